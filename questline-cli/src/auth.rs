use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};

use crate::state::ensure_questline_home;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthState {
    pub anthropic_token: Option<String>,
    pub openai_api_key: Option<String>,
}

fn auth_path() -> Result<std::path::PathBuf> {
    Ok(ensure_questline_home()?.join("auth.json"))
}

fn read_auth_file() -> Result<AuthState> {
    let p = auth_path()?;
    if !p.exists() {
        return Ok(AuthState::default());
    }
    let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

/// Stored keys, with `ANTHROPIC_API_KEY` / `OPENAI_API_KEY` taking precedence.
pub fn load_auth() -> Result<AuthState> {
    let mut auth = read_auth_file()?;
    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        auth.anthropic_token = Some(key);
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        auth.openai_api_key = Some(key);
    }
    Ok(auth)
}

fn save_auth(auth: &AuthState) -> Result<()> {
    let p = auth_path()?;
    let s = serde_json::to_string_pretty(auth)?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

fn prompt_secret(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush().ok();
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s.trim().to_string())
}

pub fn anthropic_paste_token() -> Result<()> {
    let mut auth = read_auth_file()?;
    let token = prompt_secret("Paste Anthropic API key (starts with sk-ant-)")?;
    if !token.starts_with("sk-ant-") {
        bail!("key didn't look like an Anthropic key (expected prefix sk-ant-)");
    }
    auth.anthropic_token = Some(token);
    save_auth(&auth)?;
    println!("Saved Anthropic key to ~/.questline/auth.json");
    Ok(())
}

pub fn openai_paste_api_key() -> Result<()> {
    let mut auth = read_auth_file()?;
    let key = prompt_secret("Paste OpenAI API key (starts with sk-)")?;
    if !key.starts_with("sk-") {
        bail!("key didn't look like an OpenAI API key (expected prefix sk-)");
    }
    auth.openai_api_key = Some(key);
    save_auth(&auth)?;
    println!("Saved OpenAI API key to ~/.questline/auth.json");
    Ok(())
}
