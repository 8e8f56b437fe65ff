//! Line-tagged config file representation
//!
//! A config file is an ordered sequence of lines. Recognized lines keep
//! enough structure (prefix, value, suffix) to rewrite only the value
//! text in place, preserving leading whitespace and trailing comments;
//! everything else is opaque and round-trips untouched.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{validate_cvar_key, validate_cvar_value};
use crate::error::{Error, Result};

static CVAR_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?<prefix>\s*set\s+(?<key>[A-Za-z0-9_]+)\s+)(?:"(?<quoted>[^"]*)"|(?<bare>[^\s"/]\S*))(?<suffix>\s*(?://.*)?)$"#,
    )
    .unwrap()
});

static EXEC_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*exec\s+(?<name>[A-Za-z0-9._]+)\s*(?://.*)?$").unwrap());

static BOT_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?<prefix>\s*bot\s+(?<key>[A-Za-z0-9_]+)\s+)(?<value>[^\s/]\S*)(?<suffix>\s*(?://.*)?)$"#)
        .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum LineTag {
    /// `set <key> "<value>"`, or the bare-word variant without quotes
    Cvar {
        key: String,
        value: String,
        quoted: bool,
        prefix: String,
        suffix: String,
    },
    /// `bot <key> <value>`
    Bot {
        key: String,
        value: String,
        prefix: String,
        suffix: String,
    },
    /// `exec <name>`
    Exec { name: String },
    /// Comment, blank or unrecognized; preserved byte-for-byte
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    raw: String,
    tag: LineTag,
}

impl Line {
    fn parse(raw: &str) -> Self {
        if let Some(caps) = CVAR_LINE_RE.captures(raw) {
            let (value, quoted) = match caps.name("quoted") {
                Some(m) => (m.as_str().to_string(), true),
                None => (caps["bare"].to_string(), false),
            };
            return Line {
                raw: raw.to_string(),
                tag: LineTag::Cvar {
                    key: caps["key"].to_string(),
                    value,
                    quoted,
                    prefix: caps["prefix"].to_string(),
                    suffix: caps["suffix"].to_string(),
                },
            };
        }
        if let Some(caps) = BOT_LINE_RE.captures(raw) {
            return Line {
                raw: raw.to_string(),
                tag: LineTag::Bot {
                    key: caps["key"].to_string(),
                    value: caps["value"].to_string(),
                    prefix: caps["prefix"].to_string(),
                    suffix: caps["suffix"].to_string(),
                },
            };
        }
        if let Some(caps) = EXEC_LINE_RE.captures(raw) {
            return Line {
                raw: raw.to_string(),
                tag: LineTag::Exec {
                    name: caps["name"].to_string(),
                },
            };
        }
        Line {
            raw: raw.to_string(),
            tag: LineTag::Opaque,
        }
    }

    fn new_cvar(key: &str, value: &str) -> Self {
        Line::parse(&format!("set {key} \"{value}\""))
    }

    fn new_bot(key: &str, value: &str) -> Self {
        Line::parse(&format!("bot {key} {value}"))
    }

    fn new_exec(name: &str) -> Self {
        Line::parse(&format!("exec {name}"))
    }
}

/// Whether the unquoted assignment form can carry this value: a single
/// non-empty token that does not open a comment
fn bare_representable(value: &str) -> bool {
    !value.is_empty() && !value.contains(char::is_whitespace) && !value.starts_with('/')
}

/// An ordered sequence of tagged config lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    lines: Vec<Line>,
    trailing_newline: bool,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            trailing_newline: true,
        }
    }
}

impl ConfigFile {
    /// Parse config text; every line is kept, recognized or not, and a
    /// missing final newline is preserved on write-back
    pub fn parse(content: &str) -> Self {
        let trailing_newline = content.is_empty() || content.ends_with('\n');
        let mut raw_lines: Vec<&str> = content.split('\n').collect();
        // A trailing newline produces one empty trailing element, which
        // is an artifact of the split, not a line
        if raw_lines.last() == Some(&"") {
            raw_lines.pop();
        }
        ConfigFile {
            lines: raw_lines.into_iter().map(Line::parse).collect(),
            trailing_newline,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Set a cvar: rewrite the first matching assignment in place (only
    /// the value text changes) or append a new quoted assignment
    ///
    /// Idempotent, and an overwrite rather than a duplicate: applying
    /// (key, v1) then (key, v2) equals applying (key, v2) alone.
    pub fn upsert(&mut self, key: &str, value: &str) -> Result<()> {
        validate_cvar_key(key)?;
        validate_cvar_value(key, value)?;

        for line in &mut self.lines {
            if let LineTag::Cvar {
                key: k,
                value: v,
                quoted,
                prefix,
                suffix,
            } = &mut line.tag
            {
                if k == key {
                    *v = value.to_string();
                    // A value the bare form cannot carry switches the
                    // line to quoted; the written bytes must parse back
                    // to the same assignment
                    if !bare_representable(value) {
                        *quoted = true;
                    }
                    let rendered = if *quoted {
                        format!("\"{value}\"")
                    } else {
                        value.to_string()
                    };
                    line.raw = format!("{prefix}{rendered}{suffix}");
                    return Ok(());
                }
            }
        }

        self.lines.push(Line::new_cvar(key, value));
        Ok(())
    }

    /// Same upsert algorithm over `bot <key> <value>` option lines
    ///
    /// Bot lines have no quoted form, so the value must be a single
    /// bare word.
    pub fn upsert_bot(&mut self, key: &str, value: &str) -> Result<()> {
        validate_cvar_key(key)?;
        validate_cvar_value(key, value)?;
        if !bare_representable(value) {
            return Err(Error::CvarFormat {
                reason: format!("value for bot option '{key}' must be a single bare word"),
            });
        }

        for line in &mut self.lines {
            if let LineTag::Bot {
                key: k,
                value: v,
                prefix,
                suffix,
            } = &mut line.tag
            {
                if k == key {
                    *v = value.to_string();
                    line.raw = format!("{prefix}{value}{suffix}");
                    return Ok(());
                }
            }
        }

        self.lines.push(Line::new_bot(key, value));
        Ok(())
    }

    /// Append an `exec <target>` directive
    ///
    /// Duplicates are NOT suppressed: exec order matters and repeats are
    /// meaningful to the engine being configured. This deliberately
    /// differs from cvar upsert's overwrite behavior.
    pub fn add_exec(&mut self, target: &str) -> Result<()> {
        let name = super::normalize_config_name(target)?;
        let name = name.trim_end_matches(".cfg");
        self.lines.push(Line::new_exec(name));
        Ok(())
    }

    /// Remove every `exec <target>` line; returns how many were removed
    pub fn remove_exec(&mut self, target: &str) -> usize {
        let target = target.trim_end_matches(".cfg");
        let before = self.lines.len();
        self.lines.retain(|line| {
            !matches!(&line.tag, LineTag::Exec { name } if name.trim_end_matches(".cfg") == target)
        });
        before - self.lines.len()
    }

    /// Value of the first assignment of `key`, if present
    pub fn get_cvar(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match &line.tag {
            LineTag::Cvar { key: k, value, .. } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// All recognized cvar assignments, in file order
    pub fn cvars(&self) -> Vec<(&str, &str)> {
        self.lines
            .iter()
            .filter_map(|line| match &line.tag {
                LineTag::Cvar { key, value, .. } => Some((key.as_str(), value.as_str())),
                _ => None,
            })
            .collect()
    }

    /// All exec targets, in file order, repeats included
    pub fn execs(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match &line.tag {
                LineTag::Exec { name } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl std::fmt::Display for ConfigFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            if i + 1 == self.lines.len() && !self.trailing_newline {
                write!(f, "{}", line.raw)?;
            } else {
                writeln!(f, "{}", line.raw)?;
            }
        }
        Ok(())
    }
}
