//! SMTP command line parser.

use crate::command::Command;
use crate::error::{Error, Result};
use crate::types::{Address, AuthMechanism, ReversePath};

/// Parses a single command line received from a client.
///
/// Verbs are case-insensitive. `MAIL FROM:` and `RCPT TO:` accept an
/// optional space after the colon and paths without angle brackets, which
/// some legacy clients still send.
///
/// # Errors
///
/// Returns an error if a known command has malformed arguments.
pub fn parse_command(line: &str) -> Result<Command> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (verb, rest) = line
        .split_once(' ')
        .map_or((line, ""), |(verb, rest)| (verb, rest.trim()));

    match verb.to_ascii_uppercase().as_str() {
        "HELO" => Ok(Command::Helo {
            hostname: required_arg(rest, "HELO")?,
        }),
        "EHLO" => Ok(Command::Ehlo {
            hostname: required_arg(rest, "EHLO")?,
        }),
        "STARTTLS" => Ok(Command::StartTls),
        "AUTH" => parse_auth(rest),
        "MAIL" => parse_mail(rest),
        "RCPT" => parse_rcpt(rest),
        "DATA" => Ok(Command::Data),
        "RSET" => Ok(Command::Rset),
        "VRFY" => Ok(Command::Vrfy {
            address: rest.to_string(),
        }),
        "HELP" => Ok(Command::Help),
        "NOOP" => Ok(Command::Noop),
        "QUIT" => Ok(Command::Quit),
        _ => Ok(Command::Unknown(verb.to_string())),
    }
}

fn required_arg(rest: &str, verb: &str) -> Result<String> {
    if rest.is_empty() {
        return Err(Error::protocol(format!("{verb} requires an argument")));
    }
    Ok(rest.to_string())
}

fn parse_auth(rest: &str) -> Result<Command> {
    let mut parts = rest.split_whitespace();
    let name = parts
        .next()
        .ok_or_else(|| Error::protocol("AUTH requires a mechanism"))?;
    let mechanism = AuthMechanism::parse(name)
        .ok_or_else(|| Error::protocol(format!("unsupported mechanism {name}")))?;
    let initial_response = parts.next().map(ToString::to_string);

    Ok(Command::Auth {
        mechanism,
        initial_response,
    })
}

fn parse_mail(rest: &str) -> Result<Command> {
    let arg = strip_keyword(rest, "FROM:")
        .ok_or_else(|| Error::protocol("expected MAIL FROM:<address>"))?;
    let (path, params) = split_path(arg)?;

    let from = if path.is_empty() {
        ReversePath::Null
    } else {
        ReversePath::Address(Address::new(path)?)
    };

    let mut body = None;
    let mut size = None;
    for param in params.split_whitespace() {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        match key.to_ascii_uppercase().as_str() {
            "SIZE" => {
                size = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| Error::protocol(format!("invalid SIZE value {value}")))?,
                );
            }
            "BODY" => body = Some(value.to_ascii_uppercase()),
            // AUTH=, RET=, ENVID= and friends are accepted and ignored
            _ => {}
        }
    }

    Ok(Command::MailFrom { from, body, size })
}

fn parse_rcpt(rest: &str) -> Result<Command> {
    let arg =
        strip_keyword(rest, "TO:").ok_or_else(|| Error::protocol("expected RCPT TO:<address>"))?;
    let (path, _params) = split_path(arg)?;
    Ok(Command::RcptTo {
        to: Address::new(path)?,
    })
}

/// Strips a case-insensitive keyword such as `FROM:` and any following space.
fn strip_keyword<'a>(rest: &'a str, keyword: &str) -> Option<&'a str> {
    let head = rest.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        Some(rest[keyword.len()..].trim_start())
    } else {
        None
    }
}

/// Splits `<path> params` into the bare path and the parameter string.
fn split_path(arg: &str) -> Result<(&str, &str)> {
    let (path, params) = if let Some(inner) = arg.strip_prefix('<') {
        let end = inner
            .find('>')
            .ok_or_else(|| Error::protocol("unterminated path"))?;
        (&inner[..end], &inner[end + 1..])
    } else {
        arg.split_once(' ').unwrap_or((arg, ""))
    };

    // Source routes (<@a,@b:user@c>) are obsolete; keep only the mailbox
    let path = match path.strip_prefix('@') {
        Some(route) => route.split_once(':').map_or(path, |(_, mailbox)| mailbox),
        None => path,
    };

    Ok((path, params.trim()))
}
