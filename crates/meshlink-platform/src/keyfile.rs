//! Parsing of NetworkManager keyfile text into D-Bus connection settings.
//!
//! Generated mesh profiles are rendered as keyfiles so an operator can read
//! and edit them. Installing one means translating the keyfile groups and
//! keys into the `a{sa{sv}}` dictionary `AddConnection` expects.

use std::collections::HashMap;

use zbus::zvariant::Value;

use crate::error::{PlatformError, Result};

/// Settings dictionary accepted by `org.freedesktop.NetworkManager.Settings`.
pub type ConnectionSettings = HashMap<String, HashMap<String, Value<'static>>>;

const BOOL_KEYS: &[&str] = &["autoconnect", "hidden", "may-fail", "never-default"];
const U32_KEYS: &[&str] = &["wep-key-type", "channel", "mtu", "wep-tx-keyidx"];
const LIST_KEYS: &[&str] = &["proto", "pairwise", "group", "dns", "dns-search"];

/// Keyfile as an ordered list of groups, each an ordered list of key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyfile {
    groups: Vec<(String, Vec<(String, String)>)>,
}

impl Keyfile {
    pub fn parse(text: &str) -> Result<Self> {
        let mut groups: Vec<(String, Vec<(String, String)>)> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| PlatformError::Keyfile {
                    line: idx + 1,
                    reason: "unterminated group header".to_string(),
                })?;
                groups.push((name.trim().to_string(), Vec::new()));
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| PlatformError::Keyfile {
                line: idx + 1,
                reason: format!("expected key=value, got '{line}'"),
            })?;
            let group = groups.last_mut().ok_or_else(|| PlatformError::Keyfile {
                line: idx + 1,
                reason: "key outside of any group".to_string(),
            })?;
            let value = unescape_value(value.trim()).ok_or_else(|| PlatformError::Keyfile {
                line: idx + 1,
                reason: format!("invalid escape sequence in '{}'", key.trim()),
            })?;
            group.1.push((key.trim().to_string(), value));
        }

        Ok(Self { groups })
    }

    pub fn get(&self, group: &str, key: &str) -> Option<&str> {
        self.groups
            .iter()
            .filter(|(name, _)| name == group)
            .flat_map(|(_, entries)| entries.iter())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Connection id from `[connection] id=`.
    pub fn id(&self) -> Option<&str> {
        self.get("connection", "id")
    }

    /// Converts the keyfile into a D-Bus settings dictionary.
    ///
    /// Keyfile aliases (`wifi`, `wifi-security`) are expanded to their D-Bus
    /// setting names, `type=wifi` becomes `802-11-wireless` and a UUID is
    /// generated when the keyfile carries none.
    pub fn to_settings(&self) -> Result<ConnectionSettings> {
        let mut settings: ConnectionSettings = HashMap::new();

        for (group, entries) in &self.groups {
            let setting_name = dbus_setting_name(group).to_string();
            let section = settings.entry(setting_name).or_default();
            let mut address_data = Vec::new();
            for (key, value) in entries {
                if group == "ipv4" && is_address_key(key) {
                    let (entry, gateway) = address_entry(key, value)?;
                    address_data.push(entry);
                    if let Some(gw) = gateway {
                        section.insert("gateway".to_string(), Value::from(gw));
                    }
                    continue;
                }
                let converted = convert_value(group, key, value)?;
                section.insert(key.clone(), converted);
            }
            if !address_data.is_empty() {
                section.insert("address-data".to_string(), Value::from(address_data));
            }
        }

        let connection = settings.entry("connection".to_string()).or_default();
        if !connection.contains_key("uuid") {
            connection.insert(
                "uuid".to_string(),
                Value::from(uuid::Uuid::new_v4().to_string()),
            );
        }

        Ok(settings)
    }
}

/// Escapes a value for a keyfile line.
///
/// Backslashes and line breaks are always escaped and spaces at either end
/// become `\s`, so the value reads back byte for byte and can never start
/// a new line or group.
pub fn escape_value(value: &str) -> String {
    let lead = value.len() - value.trim_start_matches(' ').len();
    let tail = value.trim_end_matches(' ').len().max(lead);

    let mut out = String::with_capacity(value.len());
    for (pos, c) in value.char_indices() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ' ' if pos < lead || pos >= tail => out.push_str("\\s"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`escape_value`]. `None` on an unknown or dangling escape.
fn unescape_value(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next()? {
            's' => ' ',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '\\' => '\\',
            _ => return None,
        });
    }
    Some(out)
}

fn dbus_setting_name(group: &str) -> &str {
    match group {
        "wifi" => "802-11-wireless",
        "wifi-security" => "802-11-wireless-security",
        "ethernet" => "802-3-ethernet",
        other => other,
    }
}

fn convert_value(group: &str, key: &str, value: &str) -> Result<Value<'static>> {
    let invalid = |reason: &str| PlatformError::InvalidArgument {
        parameter: format!("{group}.{key}"),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if group == "connection" && key == "type" {
        return Ok(Value::from(dbus_setting_name(value).to_string()));
    }
    if group == "wifi" && key == "ssid" {
        return Ok(Value::from(value.as_bytes().to_vec()));
    }
    if group == "wifi" && key == "bssid" {
        return Ok(Value::from(parse_mac(value).ok_or_else(|| invalid("not a MAC address"))?));
    }
    if BOOL_KEYS.contains(&key) {
        return match value {
            "true" | "yes" | "1" => Ok(Value::from(true)),
            "false" | "no" | "0" => Ok(Value::from(false)),
            _ => Err(invalid("expected a boolean")),
        };
    }
    if U32_KEYS.contains(&key) {
        let parsed: u32 = value.parse().map_err(|_| invalid("expected an unsigned integer"))?;
        return Ok(Value::from(parsed));
    }
    if LIST_KEYS.contains(&key) {
        let items: Vec<String> = value
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        return Ok(Value::from(items));
    }
    Ok(Value::from(value.to_string()))
}

/// `address1`, `address2`, ... (and the bare `address` alias).
fn is_address_key(key: &str) -> bool {
    key.strip_prefix("address")
        .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
}

/// Splits `ip/prefix[,gateway]` into an `address-data` entry and the gateway.
fn address_entry(key: &str, value: &str) -> Result<(HashMap<String, Value<'static>>, Option<String>)> {
    let invalid = |reason: &str| PlatformError::InvalidArgument {
        parameter: format!("ipv4.{key}"),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let (cidr, gateway) = match value.split_once(',') {
        Some((cidr, gw)) => (cidr.trim(), Some(gw.trim().to_string())),
        None => (value.trim(), None),
    };
    let (ip, prefix) = cidr.split_once('/').ok_or_else(|| invalid("expected ip/prefix"))?;
    let ip: std::net::Ipv4Addr = ip.parse().map_err(|_| invalid("not an IPv4 address"))?;
    let prefix: u32 = prefix.parse().map_err(|_| invalid("prefix is not a number"))?;
    if prefix > 32 {
        return Err(invalid("prefix must be 0-32"));
    }

    let mut entry = HashMap::new();
    entry.insert("address".to_string(), Value::from(ip.to_string()));
    entry.insert("prefix".to_string(), Value::from(prefix));
    Ok((entry, gateway.filter(|g| !g.is_empty())))
}

/// Parses `aa:bb:cc:dd:ee:ff` into six bytes.
pub fn parse_mac(text: &str) -> Option<Vec<u8>> {
    let bytes: Vec<u8> = text
        .split(':')
        .map(|part| u8::from_str_radix(part, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    (bytes.len() == 6).then_some(bytes)
}
