//! Single choke point for every external program the crate runs.
//!
//! Easy way - [`Open3Gateway::default()`](struct.Open3Gateway.html#impl-Default). It will look
//! for `ZPOOL_CMD`, `ZFS_CMD`, `ZDB_CMD`, `WG_CMD` and `SSH_KEYSCAN_CMD` in current environment
//! and fall back to the bare program name in `PATH`.
//!
//! Invocations are serialised: only one child process runs at a time per gateway. Arguments are
//! passed as separate argv entries and secrets (dataset keys, WireGuard private keys) are only
//! ever written to the child's stdin.
//!
//! ### Usage
//! ```rust,no_run
//! use zettaplane::gateway::{CommandRunner, Open3Gateway, Program};
//! let gateway = Open3Gateway::default();
//!
//! let out = gateway.run(Program::Zpool, &["list", "-H", "-o", "name"]).unwrap();
//! assert!(out.success());
//! ```
use std::{collections::HashMap,
          env,
          ffi::OsString,
          io::{self, Write},
          process::{Command, Stdio},
          sync::{Mutex, PoisonError},
          time::{Duration, Instant}};

use secrecy::{ExposeSecret, SecretString};
use slog::Logger;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::GlobalLogger;

/// Programs the gateway knows how to locate.
#[derive(AsRefStr, Display, EnumString, Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Program {
    #[strum(serialize = "zpool")]
    Zpool,
    #[strum(serialize = "zfs")]
    Zfs,
    #[strum(serialize = "zdb")]
    Zdb,
    #[strum(serialize = "wg")]
    Wg,
    #[strum(serialize = "ssh-keyscan")]
    SshKeyscan,
}

impl Program {
    /// Environment variable that overrides the location of the program.
    pub fn env_var(self) -> &'static str {
        match self {
            Program::Zpool => "ZPOOL_CMD",
            Program::Zfs => "ZFS_CMD",
            Program::Zdb => "ZDB_CMD",
            Program::Wg => "WG_CMD",
            Program::SshKeyscan => "SSH_KEYSCAN_CMD",
        }
    }

    fn default_cmd(self) -> OsString {
        match env::var_os(self.env_var()) {
            Some(val) => val,
            None => self.as_ref().into(),
        }
    }
}

/// Everything a finished child process left behind.
#[derive(Debug, Clone, Getters)]
#[get = "pub"]
pub struct CommandOutput {
    program:    Program,
    stdout:     String,
    stderr:     String,
    /// Exit code, `-1` when the child was killed by a signal.
    returncode: i32,
    duration:   Duration,
}

impl CommandOutput {
    pub fn new<O: Into<String>, E: Into<String>>(
        program: Program,
        stdout: O,
        stderr: E,
        returncode: i32,
        duration: Duration,
    ) -> Self {
        CommandOutput { program, stdout: stdout.into(), stderr: stderr.into(), returncode, duration }
    }

    pub fn success(&self) -> bool { self.returncode == 0 }
}

/// Anything that can run one of the known programs. `Open3Gateway` is the real thing; tests
/// provide scripted runners.
pub trait CommandRunner: Send + Sync {
    /// Run a program without stdin.
    fn run(&self, program: Program, args: &[&str]) -> io::Result<CommandOutput> {
        self.run_with_input(program, args, None)
    }

    /// Run a program and feed `input` to its stdin.
    fn run_with_input(
        &self,
        program: Program,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> io::Result<CommandOutput>;
}

pub struct Open3Gateway {
    commands: HashMap<Program, OsString>,
    serial:   Mutex<()>,
    logger:   Logger,
}

impl Default for Open3Gateway {
    fn default() -> Open3Gateway {
        Open3Gateway {
            commands: HashMap::new(),
            serial:   Mutex::new(()),
            logger:   GlobalLogger::component("gateway", "open3"),
        }
    }
}

impl Open3Gateway {
    /// Use supplied path for given program instead of the environment/`PATH` lookup.
    pub fn with_cmd<I: Into<OsString>>(mut self, program: Program, cmd_name: I) -> Open3Gateway {
        self.commands.insert(program, cmd_name.into());
        self
    }

    /// Use supplied logger instead of global one.
    pub fn with_logger(mut self, logger: &Logger) -> Open3Gateway {
        self.logger = logger.new(o!("zettaplane_module" => "gateway", "zettaplane_impl" => "open3"));
        self
    }

    fn command(&self, program: Program) -> Command {
        match self.commands.get(&program) {
            Some(cmd) => Command::new(cmd),
            None => Command::new(program.default_cmd()),
        }
    }
}

impl CommandRunner for Open3Gateway {
    fn run_with_input(
        &self,
        program: Program,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> io::Result<CommandOutput> {
        let _serial = self.serial.lock().unwrap_or_else(PoisonError::into_inner);
        let mut z = self.command(program);
        z.args(args);
        z.stdout(Stdio::piped());
        z.stderr(Stdio::piped());
        z.stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() });
        debug!(self.logger, "executing"; "cmd" => format_args!("{:?}", z));

        let started = Instant::now();
        let mut child = z.spawn()?;
        if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
            match stdin.write_all(bytes) {
                Err(ref e) if e.kind() == io::ErrorKind::BrokenPipe => {},
                other => other?,
            }
        }
        let out = child.wait_with_output()?;
        let duration = started.elapsed();
        let returncode = out.status.code().unwrap_or(-1);
        trace!(self.logger, "finished"; "program" => program.as_ref(), "returncode" => returncode,
               "duration_ms" => duration.as_millis() as u64);

        Ok(CommandOutput {
            program,
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            returncode,
            duration,
        })
    }
}

fn failed(out: &CommandOutput) -> io::Error {
    io::Error::new(
        io::ErrorKind::Other,
        format!("{} exited with {}: {}", out.program(), out.returncode(), out.stderr().trim()),
    )
}

/// `wg genkey`.
pub fn wg_genkey(runner: &dyn CommandRunner) -> io::Result<SecretString> {
    let out = runner.run(Program::Wg, &["genkey"])?;
    if !out.success() {
        return Err(failed(&out));
    }
    Ok(SecretString::from(out.stdout().trim().to_string()))
}

/// `wg pubkey`, private key goes through stdin.
pub fn wg_pubkey(runner: &dyn CommandRunner, private_key: &SecretString) -> io::Result<String> {
    let input = format!("{}\n", private_key.expose_secret());
    let out = runner.run_with_input(Program::Wg, &["pubkey"], Some(input.as_bytes()))?;
    if !out.success() {
        return Err(failed(&out));
    }
    Ok(out.stdout().trim().to_string())
}

/// `wg show <interface> latest-handshakes` as `(peer public key, unix timestamp)` pairs.
pub fn wg_latest_handshakes(
    runner: &dyn CommandRunner,
    interface: &str,
) -> io::Result<Vec<(String, i64)>> {
    let out = runner.run(Program::Wg, &["show", interface, "latest-handshakes"])?;
    if !out.success() {
        return Err(failed(&out));
    }
    Ok(out
        .stdout()
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(peer), Some(ts)) => ts.parse().ok().map(|ts| (peer.to_string(), ts)),
                _ => None,
            }
        })
        .collect())
}

/// `ssh-keyscan -p <port> <host>`; returns the raw known_hosts lines.
pub fn ssh_keyscan(runner: &dyn CommandRunner, host: &str, port: u16) -> io::Result<String> {
    let port = port.to_string();
    let out = runner.run(Program::SshKeyscan, &["-p", &port, host])?;
    if !out.success() || out.stdout().trim().is_empty() {
        return Err(failed(&out));
    }
    Ok(out.stdout().clone())
}
