use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::client::{ClientConfig, DEFAULT_RAPI_ROOT};

#[derive(Debug, Default, PartialEq)]
struct RcConfig {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    verify: Option<bool>,
}

pub(crate) fn load_config(
    username: Option<String>,
    password: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    let mut username = username.or_else(|| std::env::var("EODMS_USER").ok());
    let mut password = password.or_else(|| std::env::var("EODMS_PASSWORD").ok());
    let mut url = std::env::var("EODMS_RAPI_URL").ok();

    let rc_candidates = rc_candidates();
    let mut file_verify: Option<bool> = None;

    if username.is_none() || password.is_none() || url.is_none() || verify.is_none() {
        for rc_path in &rc_candidates {
            if rc_path.exists() {
                let cfg = read_rc(rc_path).with_context(|| {
                    format!("failed to read configuration file {}", rc_path.display())
                })?;

                if username.is_none() {
                    username = cfg.username;
                }
                if password.is_none() {
                    password = cfg.password;
                }
                if url.is_none() {
                    url = cfg.url;
                }
                file_verify = cfg.verify;
                break;
            }
        }
    }

    let Some(username) = username else {
        bail!(
            "Missing configuration: username (set EODMS_USER or put `username:` in one of: {})",
            searched(&rc_candidates)
        );
    };

    let Some(password) = password else {
        bail!(
            "Missing configuration: password (set EODMS_PASSWORD or put `password:` in one of: {})",
            searched(&rc_candidates)
        );
    };

    let url = url.unwrap_or_else(|| DEFAULT_RAPI_ROOT.to_string());
    let verify = verify.or(file_verify).unwrap_or(true);

    Ok(ClientConfig {
        url,
        username,
        password,
        verify,
    })
}

fn searched(candidates: &[PathBuf]) -> String {
    if candidates.is_empty() {
        return ".eodmsrc".to_string();
    }
    candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    // A key may be left empty with its value on the next line.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !looks_like_entry(line) {
                assign(&mut cfg, pk, strip_quotes(line));
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            match k {
                "url" | "username" | "user" | "password" => {
                    if v.is_empty() {
                        pending_key = Some(k);
                    } else {
                        assign(&mut cfg, k, v);
                    }
                }
                "verify" => {
                    if !v.is_empty() {
                        cfg.verify = Some(!matches!(v, "0" | "false" | "no"));
                    }
                }
                _ => {}
            }
        }
    }

    cfg
}

// `https://...` contains a colon too, so only known keys start an entry.
fn looks_like_entry(line: &str) -> bool {
    line.split_once(':').is_some_and(|(k, _)| {
        matches!(
            k.trim(),
            "url" | "username" | "user" | "password" | "verify"
        )
    })
}

fn assign(cfg: &mut RcConfig, key: &str, value: &str) {
    let value = Some(value.to_string());
    match key {
        "url" => cfg.url = value,
        "username" | "user" => cfg.username = value,
        "password" => cfg.password = value,
        _ => {}
    }
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) EODMS_RC (explicit)
    // 2) ./.eodmsrc
    // 3) ~/.eodmsrc
    if let Ok(p) = std::env::var("EODMS_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".eodmsrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".eodmsrc"));
    }
    v
}
