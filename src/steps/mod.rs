// src/steps/mod.rs

//! Built-in steps. Each module exports `NAME`, `EVENTS` and the step type.

pub mod cmd;
pub mod echo;
pub mod sleep;

pub use cmd::CmdStep;
pub use echo::EchoStep;
pub use sleep::SleepStep;
