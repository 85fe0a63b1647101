//! stack::compose
//!
//! Reading published ports from a compose file and rewriting them in place.
//!
//! # Parsing
//!
//! The file is parsed with `serde_yaml` only to learn which host ports each
//! service publishes. Both port syntaxes are understood:
//!
//! - short: `"8080:80"`, `"127.0.0.1:8080:80"`, `"8080:80/tcp"`
//! - long: `{ target: 80, published: 8080 }`
//!
//! Entries without a host port (`"80"`) and host port ranges are ignored.
//!
//! # Rewriting
//!
//! A port change rewrites the original text rather than re-serializing the
//! YAML, so comments, ordering and quoting survive. Only lines inside the
//! named service's block are touched. The result is written atomically.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::debug;

use crate::core::errors::SpinError;
use crate::core::store::write_atomic;

/// A host port published by a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedMapping {
    pub host_port: u16,
    pub container_port: u16,
}

/// A host port declared in the compose file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredPort {
    pub service: String,
    pub host_port: u16,
    pub container_port: u16,
}

/// A compose file on disk.
#[derive(Debug, Clone)]
pub struct ComposeFile {
    path: PathBuf,
    services: BTreeMap<String, Vec<PublishedMapping>>,
}

impl ComposeFile {
    /// Load and parse a compose file.
    ///
    /// # Errors
    ///
    /// [`SpinError::Io`] if unreadable, [`SpinError::Config`] if not YAML.
    pub fn load(path: &Path) -> Result<Self, SpinError> {
        let content = fs::read_to_string(path).map_err(|e| SpinError::io(path, e))?;
        Self::parse(path, &content)
    }

    /// Parse compose content that lives at `path`.
    pub fn parse(path: &Path, content: &str) -> Result<Self, SpinError> {
        let doc: Value = serde_yaml::from_str(content).map_err(|e| {
            SpinError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;

        let mut services = BTreeMap::new();
        if let Some(map) = doc.get("services").and_then(Value::as_mapping) {
            for (name, service) in map {
                let Some(name) = name.as_str() else { continue };
                let ports = service
                    .get("ports")
                    .and_then(Value::as_sequence)
                    .map(|seq| seq.iter().filter_map(parse_port_entry).collect())
                    .unwrap_or_default();
                services.insert(name.to_string(), ports);
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            services,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Service names, sorted.
    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    /// Every declared host port, in service order.
    pub fn declared_ports(&self) -> Vec<DeclaredPort> {
        self.services
            .iter()
            .flat_map(|(service, mappings)| {
                mappings.iter().map(move |m| DeclaredPort {
                    service: service.clone(),
                    host_port: m.host_port,
                    container_port: m.container_port,
                })
            })
            .collect()
    }

    /// Change `service`'s published host port from `old` to `new` on disk.
    ///
    /// # Errors
    ///
    /// [`SpinError::Config`] if the mapping cannot be located in the text.
    pub fn rewrite_host_port(&mut self, service: &str, old: u16, new: u16) -> Result<(), SpinError> {
        let content = fs::read_to_string(&self.path).map_err(|e| SpinError::io(&self.path, e))?;
        let updated = rewrite_host_port(&content, service, old, new).ok_or_else(|| {
            SpinError::Config(format!(
                "cannot find host port {} of service '{}' in {}",
                old,
                service,
                self.path.display()
            ))
        })?;
        write_atomic(&self.path, updated.as_bytes())?;
        debug!(service, old, new, file = %self.path.display(), "rewrote published port");

        if let Some(mappings) = self.services.get_mut(service) {
            for m in mappings.iter_mut().filter(|m| m.host_port == old) {
                m.host_port = new;
            }
        }
        Ok(())
    }
}

fn parse_port_entry(entry: &Value) -> Option<PublishedMapping> {
    match entry {
        Value::String(s) => parse_short_syntax(s),
        Value::Mapping(_) => {
            let host_port = port_value(entry.get("published")?)?;
            let container_port = port_value(entry.get("target")?)?;
            Some(PublishedMapping {
                host_port,
                container_port,
            })
        }
        // A bare number publishes no host port.
        _ => None,
    }
}

fn port_value(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `[ip:]host:container[/proto]`
fn parse_short_syntax(entry: &str) -> Option<PublishedMapping> {
    let without_proto = entry.split('/').next()?.trim();
    let mut parts: Vec<&str> = without_proto.rsplitn(3, ':').collect();
    parts.reverse();
    let (host, container) = match parts.as_slice() {
        [host, container] | [_, host, container] => (*host, *container),
        _ => return None,
    };
    Some(PublishedMapping {
        host_port: host.parse().ok()?,
        container_port: container.parse().ok()?,
    })
}

/// Textual rewrite of one service's host port. `None` if nothing matched.
fn rewrite_host_port(content: &str, service: &str, old: u16, new: u16) -> Option<String> {
    let mut out = Vec::new();
    let mut changed = false;

    let mut in_services = false;
    let mut service_indent: Option<usize> = None;
    let mut in_target = false;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim();
        let indent = line.len() - line.trim_start().len();
        let significant = !trimmed.is_empty() && !trimmed.starts_with('#');

        if significant && indent == 0 {
            in_services = trimmed.starts_with("services:");
            service_indent = None;
            in_target = false;
        } else if in_services && significant {
            let level = *service_indent.get_or_insert(indent);
            if indent == level {
                let key = trimmed.trim_end_matches(':').trim_matches(|c: char| c == '"' || c == '\'');
                in_target = trimmed.ends_with(':') && key == service;
            } else if indent < level {
                in_target = false;
            }
        }

        if in_target && significant && !changed {
            if let Some(rewritten) = replace_port_in_line(line, old, new) {
                out.push(rewritten);
                changed = true;
                continue;
            }
        }
        out.push(line.to_string());
    }

    changed.then(|| out.concat())
}

fn replace_port_in_line(line: &str, old: u16, new: u16) -> Option<String> {
    if let Some(rewritten) = replace_published(line, old, new) {
        return rewritten;
    }

    // Short syntax: the host port is followed by `:<digit>` and preceded by
    // a quote, a space, `[`, `,`, `-` or an IP's `:`.
    let needle = format!("{}:", old);
    let bytes = line.as_bytes();
    let mut search_from = 0;
    while let Some(offset) = line[search_from..].find(&needle) {
        let at = search_from + offset;
        let end = at + needle.len();
        let before_ok = at == 0
            || matches!(bytes[at - 1], b'"' | b'\'' | b' ' | b'[' | b',' | b'-' | b':');
        let after_ok = bytes.get(end).is_some_and(u8::is_ascii_digit);
        if before_ok && after_ok {
            return Some(format!("{}{}:{}", &line[..at], new, &line[end..]));
        }
        search_from = end;
    }
    None
}

/// Long syntax: `published: 8080`, also as the first key of a list item
/// (`- published: 8080`) or inside a flow mapping
/// (`- { target: 80, published: 8080 }`).
///
/// `None` if the line has no `published` key, `Some(None)` if it has one for
/// a different port.
fn replace_published(line: &str, old: u16, new: u16) -> Option<Option<String>> {
    const KEY: &str = "published:";
    let bytes = line.as_bytes();
    let mut search_from = 0;
    let mut found = false;
    while let Some(offset) = line[search_from..].find(KEY) {
        let at = search_from + offset;
        search_from = at + KEY.len();
        let key_start = at == 0 || matches!(bytes[at - 1], b' ' | b'\t' | b'{' | b',' | b'-');
        if !key_start {
            continue;
        }
        found = true;

        let value = &line[search_from..];
        let digits_at = search_from + value.len()
            - value.trim_start_matches(|c: char| c == ' ' || c == '"' || c == '\'').len();
        let digits_len = line[digits_at..].bytes().take_while(u8::is_ascii_digit).count();
        let digits = &line[digits_at..digits_at + digits_len];
        if digits.parse::<u16>().ok() == Some(old) {
            return Some(Some(format!(
                "{}{}{}",
                &line[..digits_at],
                new,
                &line[digits_at + digits_len..]
            )));
        }
    }
    found.then_some(None)
}
