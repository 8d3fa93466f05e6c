//! Line prompts with shown defaults.
//!
//! An empty answer always means "keep the default shown in brackets". For
//! passwords the default is never echoed, only a mask.

use crate::config::{
    CredentialDefaults, CredentialOverrides, ResolvedCredentials, ValueSource, resolve_credentials,
};
use crate::models::ConnectionCredentials;
use std::io::{self, BufRead, Write};

const SECRET_MASK: &str = "********";

/// Where prompt answers come from.
pub trait LineReader {
    /// Next line without its terminator, or `None` at end of input.
    fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Next line read without echo, where the input supports it.
    fn read_secret(&mut self) -> io::Result<Option<String>> {
        self.read_line()
    }
}

/// Process stdin; secrets are read with terminal echo off.
pub struct StdinReader;

impl LineReader for StdinReader {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn read_secret(&mut self) -> io::Result<Option<String>> {
        crate::sys::read_secret_line()
    }
}

/// Any buffered reader, one answer per line.
pub struct BufLines<R>(pub R);

impl<R: BufRead> LineReader for BufLines<R> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.0.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

pub struct Prompter<L, W> {
    input: L,
    output: W,
}

impl Prompter<StdinReader, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(StdinReader, io::stdout())
    }
}

impl<L: LineReader, W: Write> Prompter<L, W> {
    pub fn new(input: L, output: W) -> Self {
        Self { input, output }
    }

    pub fn output(&mut self) -> &mut W {
        &mut self.output
    }

    pub fn say(&mut self, message: impl std::fmt::Display) -> io::Result<()> {
        writeln!(self.output, "{}", message)
    }

    /// Print `prompt` and read one trimmed answer. `None` at end of input.
    pub fn line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        self.ask(prompt, false)
    }

    fn ask(&mut self, prompt: &str, secret: bool) -> io::Result<Option<String>> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;
        let answer = if secret {
            self.input.read_secret()?
        } else {
            self.input.read_line()?
        };
        Ok(answer.map(|a| a.trim().to_string()))
    }

    fn required(&mut self, prompt: &str, secret: bool) -> io::Result<String> {
        self.ask(prompt, secret)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"))
    }

    /// Free text. `None` keeps `default`.
    pub fn text(&mut self, label: &str, default: &str) -> io::Result<Option<String>> {
        let prompt = if default.is_empty() {
            format!("{}: ", label)
        } else {
            format!("{} [{}]: ", label, default)
        };
        let answer = self.required(&prompt, false)?;
        Ok(Some(answer).filter(|a| !a.is_empty()))
    }

    /// Password. `None` keeps the remembered value, if any.
    pub fn secret(&mut self, label: &str, remembered: bool) -> io::Result<Option<String>> {
        let prompt = if remembered {
            format!("{} [{}]: ", label, SECRET_MASK)
        } else {
            format!("{}: ", label)
        };
        let answer = self.required(&prompt, true)?;
        Ok(Some(answer).filter(|a| !a.is_empty()))
    }

    /// Yes/no question. `yes`, `y`, `1` accept; empty takes `default`.
    pub fn confirm(&mut self, label: &str, default: bool) -> io::Result<bool> {
        let shown = if default { "yes" } else { "no" };
        let answer = self.required(&format!("{} (yes/no) [{}]: ", label, shown), false)?;
        if answer.is_empty() {
            return Ok(default);
        }
        Ok(is_yes(&answer))
    }

    /// Port number; re-asks until the answer is empty or a valid port.
    pub fn port(&mut self, label: &str, default: u16) -> io::Result<Option<u16>> {
        loop {
            let Some(answer) = self.text(label, &default.to_string())? else {
                return Ok(None);
            };
            match answer.parse::<u16>() {
                Ok(port) if port != 0 => return Ok(Some(port)),
                _ => self.say(format!("  '{}' is not a port number (1-65535)", answer))?,
            }
        }
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "yes" | "y" | "1")
}

/// Ask for every connection field, offering `prior` (else hard defaults)
/// as the default for each.
///
/// Tunnel fields are only asked when the tunnel is on; when it is off they
/// keep their prior values untouched.
pub fn prompt_credentials<L: LineReader, W: Write>(
    p: &mut Prompter<L, W>,
    prior: Option<&ConnectionCredentials>,
    defaults: &CredentialDefaults,
) -> io::Result<ResolvedCredentials> {
    let shown =
        resolve_credentials(&CredentialOverrides::default(), ValueSource::Prompt, prior, defaults)
            .credentials();
    let mut answers = CredentialOverrides::default();

    p.say("Connection settings")?;
    let use_tunnel = p.confirm("Connect through an SSH tunnel?", shown.use_tunnel)?;
    answers.use_tunnel = Some(use_tunnel);

    if use_tunnel {
        answers.tunnel_host = p.text("SSH host", &shown.tunnel_host)?;
        answers.tunnel_port = p.port("SSH port", shown.tunnel_port)?;
        answers.tunnel_user = p.text("SSH user", &shown.tunnel_user)?;
        answers.tunnel_password = p.secret("SSH password", !shown.tunnel_password.is_empty())?;
    }

    answers.db_host = p.text("Database host", &shown.db_host)?;
    answers.db_port = p.port("Database port", shown.db_port)?;
    answers.db_name = p.text("Database name", &shown.db_name)?;
    answers.db_user = p.text("Database user", &shown.db_user)?;
    answers.db_password = p.secret("Database password", !shown.db_password.is_empty())?;

    Ok(resolve_credentials(
        &answers,
        ValueSource::Prompt,
        prior,
        defaults,
    ))
}
