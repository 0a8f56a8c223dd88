//! Built-in plugins.

mod lifetime;
mod os;

pub use lifetime::{KillList, KillTarget, LifetimePlugin};
pub use os::OsPlugin;

/// Shell used to run command strings on this platform.
pub(crate) fn shell_command(cmd: &str) -> tokio::process::Command {
    if cfg!(windows) {
        let mut command = tokio::process::Command::new("cmd");
        command.arg("/C").arg(cmd);
        command
    } else {
        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(cmd);
        command
    }
}
