//! Wire protocols spoken to the board.
//!
//! Currently only the MicroPython raw-REPL upload sequence.

pub mod raw_repl;
