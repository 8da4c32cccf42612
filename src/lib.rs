//! `ocflkit` is a library and CLI for reading, writing, and validating repositories that
//! follow the [Oxford Common File Layout](https://ocfl.io/) specification. The library
//! surface lives in [`ocfl`]; the `cmd` module backs the `ocflkit` binary.

pub mod cmd;
pub mod ocfl;
