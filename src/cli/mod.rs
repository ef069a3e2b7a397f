pub(crate) mod command;
pub(crate) mod run;

pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat, RunArgs};
