use super::shell::quote;
use super::{CommandOutput, RemoteFile, RemoteStat, Transport, TransportError};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::str::FromStr;
use std::time::{Duration, UNIX_EPOCH};
use tracing::trace;

/// Exit status the stat wrapper uses for a missing path.
const MISSING_STATUS: i32 = 44;

/// `[user@]host[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshDestination {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl FromStr for SshDestination {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("Invalid host {}", value);

        let (user, rest) = match value.split('@').collect::<Vec<_>>().as_slice() {
            [rest] => (None, *rest),
            [user, rest] if !user.is_empty() => (Some(user.to_string()), *rest),
            _ => return Err(invalid()),
        };
        let (host, port) = match rest.split(':').collect::<Vec<_>>().as_slice() {
            [host] => (*host, None),
            [host, port] => (*host, Some(port.parse::<u16>().map_err(|_| invalid())?)),
            _ => return Err(invalid()),
        };
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(SshDestination {
            user,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for SshDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

/// Runs every operation through the system OpenSSH client.
///
/// Authentication, agents and known-hosts handling are left to `ssh` itself.
/// Connection multiplexing (`ControlMaster`) is on by default so the many
/// short commands of a run share one session.
#[derive(Debug, Clone)]
pub struct SshTransport {
    destination: SshDestination,
    identity_file: Option<PathBuf>,
    strict_host_keys: bool,
    use_local_keys: bool,
    multiplex: bool,
}

impl SshTransport {
    pub fn new(destination: SshDestination) -> Self {
        Self {
            destination,
            identity_file: None,
            strict_host_keys: false,
            use_local_keys: true,
            multiplex: true,
        }
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Refuse hosts whose key is not already known.
    pub fn with_strict_host_keys(mut self, strict: bool) -> Self {
        self.strict_host_keys = strict;
        self
    }

    /// Allow keys from `~/.ssh` and the agent.
    pub fn with_local_keys(mut self, enabled: bool) -> Self {
        self.use_local_keys = enabled;
        self
    }

    pub fn with_multiplexing(mut self, enabled: bool) -> Self {
        self.multiplex = enabled;
        self
    }

    pub fn destination(&self) -> &SshDestination {
        &self.destination
    }

    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        if let Some(port) = self.destination.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(user) = &self.destination.user {
            cmd.arg("-l").arg(user);
        }
        if let Some(id) = &self.identity_file {
            cmd.arg("-i").arg(id);
        }
        cmd.arg("-o").arg(if self.strict_host_keys {
            "StrictHostKeyChecking=yes"
        } else {
            "StrictHostKeyChecking=accept-new"
        });
        if !self.use_local_keys {
            cmd.arg("-o").arg("IdentitiesOnly=yes");
            cmd.arg("-o").arg("IdentityAgent=none");
        }
        if self.multiplex {
            cmd.arg("-o").arg("ControlMaster=auto");
            cmd.arg("-o").arg("ControlPath=~/.ssh/refile-%C");
            cmd.arg("-o").arg("ControlPersist=60");
        }
        cmd.arg(&self.destination.host).arg(remote_command);
        trace!("ssh {} {}", self.destination, remote_command);
        cmd
    }

    fn run(&self, remote_command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, TransportError> {
        let mut cmd = self.command(remote_command);
        let context = || format!("running ssh to {}", self.destination);

        let output: Output = match stdin {
            None => cmd.stdin(Stdio::null()).output().map_err(|e| TransportError::io(context(), e))?,
            Some(bytes) => {
                let mut child = cmd
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| TransportError::io(context(), e))?;
                if let Some(mut pipe) = child.stdin.take() {
                    pipe.write_all(bytes).map_err(|e| TransportError::io(context(), e))?;
                }
                child.wait_with_output().map_err(|e| TransportError::io(context(), e))?
            }
        };

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            status: output.status.code().unwrap_or(-1),
        })
    }
}

impl Transport for SshTransport {
    fn exec(&self, command: &str) -> Result<CommandOutput, TransportError> {
        self.run(command, None)
    }

    fn stat(&self, path: &str) -> Result<RemoteStat, TransportError> {
        let command = stat_command(path);
        let output = self.run(&command, None)?;
        if output.status == MISSING_STATUS {
            return Err(TransportError::NotFound(path.to_string()));
        }
        let output = output.check(&command)?;
        parse_stat(&output.stdout_lossy()).ok_or_else(|| TransportError::UnexpectedOutput {
            command,
            detail: output.stdout_lossy(),
        })
    }

    fn list_regular_files(&self, root: &str) -> Result<Vec<RemoteFile>, TransportError> {
        let command = format!("find {} -type f -print0", quote(root));
        let output = self.run(&command, None)?.check(&command)?;
        parse_find_output(&output.stdout, &command)
    }

    fn upload(&self, content: &[u8], path: &str) -> Result<(), TransportError> {
        let command = format!("cat > {}", quote(path));
        self.run(&command, Some(content))?.check(&command)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), TransportError> {
        let command = format!("rm -f -- {}", quote(path));
        self.run(&command, None)?.check(&command)?;
        Ok(())
    }
}

/// `size mtime atime octal-mode` for `path`, GNU `stat` first, BSD `stat` second.
fn stat_command(path: &str) -> String {
    let p = quote(path);
    format!(
        "if [ -e {p} ]; then stat -L -c '%s %Y %X %a' -- {p} 2>/dev/null || stat -L -f '%z %m %a %Lp' -- {p}; else exit {status}; fi",
        p = p,
        status = MISSING_STATUS
    )
}

fn parse_stat(stdout: &str) -> Option<RemoteStat> {
    let fields: Vec<&str> = stdout.split_whitespace().collect();
    if fields.len() != 4 {
        return None;
    }
    let size = fields[0].parse::<u64>().ok()?;
    let modified = UNIX_EPOCH + Duration::from_secs(fields[1].parse::<u64>().ok()?);
    let accessed = UNIX_EPOCH + Duration::from_secs(fields[2].parse::<u64>().ok()?);
    let permissions = u32::from_str_radix(fields[3], 8).ok()? & 0o7777;
    Some(RemoteStat {
        size,
        modified,
        accessed,
        permissions,
    })
}

fn parse_find_output(stdout: &[u8], command: &str) -> Result<Vec<RemoteFile>, TransportError> {
    stdout
        .split(|b| *b == 0)
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            let path = std::str::from_utf8(raw).map_err(|_| TransportError::UnexpectedOutput {
                command: command.to_string(),
                detail: format!("non UTF-8 path {}", String::from_utf8_lossy(raw)),
            })?;
            RemoteFile::from_path(path).ok_or_else(|| TransportError::UnexpectedOutput {
                command: command.to_string(),
                detail: format!("cannot split {:?}", path),
            })
        })
        .collect()
}
