//! `{name}` placeholder templates for the generated profile and daemon config.
//!
//! `{{` and `}}` render as literal braces. An unknown placeholder or a stray
//! brace is an error; nothing is rendered half-filled.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MeshError, Result};
use crate::persist::write_atomic;

pub type TemplateVars = BTreeMap<&'static str, String>;

pub const PROFILE_TEMPLATE_FILE: &str = "profile.nmconnection.tmpl";
pub const SHARED_KEY_TEMPLATE_FILE: &str = "shared_key.tmpl";
pub const OLSRD_TEMPLATE_FILE: &str = "olsrd.conf.tmpl";

pub const PROFILE_EXTENSION: &str = "nmconnection";
pub const OLSRD_CONF_EXTENSION: &str = "olsrd.conf";

const BUILTIN_PROFILE: &str = "\
[connection]
id={profile_name}
type=wifi
interface-name={interface_name}
autoconnect=false

[wifi]
mode={wifi_mode}
ssid={ssid}
bssid={bssid}
# ssid-hex={ssid_hex} bss={bss_type} auth={auth} cipher={cipher}

{shared_key}
[ipv4]
method=manual
address1={ip}/{prefix_len}

[ipv6]
method=ignore
";

const BUILTIN_SHARED_KEY: &str = "\
[wifi-security]
# {key_type}
key-mgmt={key_mgmt}
{key_setting}={key_material}
";

const BUILTIN_OLSRD: &str = "\
DebugLevel 0
IpVersion 4
LinkQualityLevel 2
LinkQualityAlgorithm \"etx_ff\"

Hna4
{{
    {masked_ip} {netmask}
}}

Interface \"{interface_name}\"
{{
    Mode \"mesh\"
}}
";

/// Substitutes `vars` into `template`.
pub fn render(template: &str, vars: &TemplateVars) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let rest = &template[pos + 1..];
                let end = rest.find('}').ok_or_else(|| MeshError::Template {
                    reason: format!("unterminated placeholder at byte {pos}"),
                })?;
                let name = &rest[..end];
                let value = vars.get(name).ok_or_else(|| MeshError::Template {
                    reason: format!("unknown placeholder '{{{name}}}'"),
                })?;
                out.push_str(value);
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                }
            }
            '}' => {
                return Err(MeshError::Template {
                    reason: format!("unmatched '}}' at byte {pos}"),
                });
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

/// The three document templates, built-in or overridden from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
    pub profile: String,
    pub shared_key: String,
    pub olsrd: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            profile: BUILTIN_PROFILE.to_string(),
            shared_key: BUILTIN_SHARED_KEY.to_string(),
            olsrd: BUILTIN_OLSRD.to_string(),
        }
    }
}

impl Templates {
    /// Built-ins, replaced by any template file present in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut templates = Self::default();
        for (file, slot) in [
            (PROFILE_TEMPLATE_FILE, &mut templates.profile),
            (SHARED_KEY_TEMPLATE_FILE, &mut templates.shared_key),
            (OLSRD_TEMPLATE_FILE, &mut templates.olsrd),
        ] {
            let path = dir.join(file);
            if !path.exists() {
                continue;
            }
            *slot = fs::read_to_string(&path)
                .map_err(|e| MeshError::io(format!("reading template {}", path.display()), e))?;
            tracing::debug!(target: "mesh", template = %path.display(), "template_override");
        }
        Ok(templates)
    }
}

/// File stem for generated documents: the SSID with path-hostile
/// characters replaced.
pub fn file_stem(ssid: &str) -> String {
    let stem: String = ssid
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match stem.trim_start_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Writes a rendered document to `<dir>/<ssid>.<extension>`.
pub fn write_generated(dir: &Path, ssid: &str, extension: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(format!("{}.{}", file_stem(ssid), extension));
    write_atomic(&path, contents.as_bytes())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&'static str, &str)]) -> TemplateVars {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn test_render_substitutes_and_unescapes() {
        let out = render("Hna4\n{{\n  {ip} {mask}\n}}\n", &vars(&[("ip", "5.0.0.0"), ("mask", "255.0.0.0")]))
            .unwrap();
        assert_eq!(out, "Hna4\n{\n  5.0.0.0 255.0.0.0\n}\n");
    }

    #[test]
    fn test_render_rejects_unknown_placeholder() {
        let err = render("id={missing}", &vars(&[])).unwrap_err();
        assert!(matches!(err, MeshError::Template { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_render_rejects_stray_braces() {
        assert!(render("a } b", &vars(&[])).is_err());
        assert!(render("a {b", &vars(&[("b", "x")])).is_err());
    }

    #[test]
    fn test_render_keeps_multibyte_text() {
        let out = render("ssid={ssid} ✓", &vars(&[("ssid", "café")])).unwrap();
        assert_eq!(out, "ssid=café ✓");
    }

    #[test]
    fn test_builtin_olsrd_template_renders() {
        let out = render(
            &Templates::default().olsrd,
            &vars(&[
                ("masked_ip", "5.0.0.0"),
                ("netmask", "255.0.0.0"),
                ("interface_name", "wlan0"),
            ]),
        )
        .unwrap();
        assert!(out.contains("    5.0.0.0 255.0.0.0\n"));
        assert!(out.contains("Interface \"wlan0\"\n{\n"));
    }

    #[test]
    fn test_load_prefers_files_in_template_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(OLSRD_TEMPLATE_FILE), "Interface \"{interface_name}\"\n").unwrap();
        let templates = Templates::load(dir.path()).unwrap();
        assert_eq!(templates.olsrd, "Interface \"{interface_name}\"\n");
        assert_eq!(templates.profile, Templates::default().profile);
    }

    #[test]
    fn test_file_stem_sanitizes_ssid() {
        assert_eq!(file_stem("commotionwireless.net"), "commotionwireless.net");
        assert_eq!(file_stem("my mesh/1"), "my_mesh_1");
        assert_eq!(file_stem(".."), "_");
    }

    #[test]
    fn test_write_generated_names_file_by_ssid() {
        let dir = TempDir::new().unwrap();
        let path = write_generated(dir.path(), "test mesh", OLSRD_CONF_EXTENSION, "x").unwrap();
        assert_eq!(path, dir.path().join("test_mesh.olsrd.conf"));
        assert_eq!(fs::read_to_string(path).unwrap(), "x");
    }
}
