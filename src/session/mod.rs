// src/session/mod.rs

pub mod machine;
pub mod monitor;
pub mod persist;
pub mod runner;
pub mod timer;

pub use machine::ExamEngine;
pub use runner::{Command, IntegrityEvent, SessionHandle, SessionRunner};
