use std::collections::BTreeMap;
use std::env;
use std::io::Read;

use crate::resolver::{ValueRef, ValueResolver};
use serde_yaml::{Mapping, Value as YamlValue};

/// Address/token configuration for a Vault-backed environment.
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    pub url: String,
}

// All main errors that can happen from the vault backend

#[derive(Debug)]
struct VaultError {
    inner: Context<VErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
enum VErrKind {
    #[fail(display = "secret '{}' does not have the 'value' key", _0)]
    InvalidSecretForm(String),

    #[fail(display = "secret '{}' could not be reached or accessed", _0)]
    SecretNotAccessible(String),

    #[fail(display = "VAULT_ADDR not specified")]
    MissingAddr,

    #[fail(display = "VAULT_TOKEN not specified")]
    MissingToken,

    #[fail(display = "Unexpected HTTP status {} from {}", _0, _1)]
    UnexpectedHttpStatus(reqwest::StatusCode, String),
}
use failure::{Error, Fail, Context, Backtrace, ResultExt};
use std::fmt::{self, Display};

impl Fail for VaultError {
    fn cause(&self) -> Option<&dyn Fail> { self.inner.cause() }
    fn backtrace(&self) -> Option<&Backtrace> { self.inner.backtrace() }
}
impl Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<VErrKind> for VaultError {
    fn from(kind: VErrKind) -> VaultError {
        VaultError { inner: Context::new(kind) }
    }
}
impl From<Context<VErrKind>> for VaultError {
    fn from(inner: Context<VErrKind>) -> VaultError {
        VaultError { inner: inner }
    }
}
type Result<T> = std::result::Result<T, Error>;

fn default_addr() -> Result<String> {
    Ok(env::var("VAULT_ADDR").context(VErrKind::MissingAddr)?)
}

#[cfg(feature = "filesystem")]
fn file_token_fallback() -> Result<String> {
    use std::fs::File;
    let home = dirs::home_dir();
    ensure!(home.is_some(), "system must have a home directory");

    let mut f = File::open(home.unwrap().join(".vault-token"))?;
    let mut token = String::new();
    f.read_to_string(&mut token)?;
    Ok(token.trim().to_string())
}

fn default_token() -> Result<String> {
    let t = env::var("VAULT_TOKEN")
        .or_else(|_: env::VarError| -> Result<String> {
            if cfg!(feature = "filesystem") {
                #[cfg(feature = "filesystem")]
                return file_token_fallback();
            }
            bail!("no vault token file available outside the filesystem feature")
        })
        .context(VErrKind::MissingToken)?;
    Ok(t)
}

/// Secrets in vault values can be integers or strings; integers are coerced
/// to strings because they can't easily be quoted as `--set`/values-file
/// scalars without ending up double-quoted.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum SecretValue {
    S(String),
    I(i64),
}
impl From<SecretValue> for String {
    fn from(sv: SecretValue) -> String {
        match sv {
            SecretValue::I(i) => i.to_string(),
            SecretValue::S(s) => s,
        }
    }
}

/// Secret data retrieved from Vault using only standard fields
#[derive(Debug, Deserialize)]
struct Secret {
    data: BTreeMap<String, SecretValue>,
    #[allow(dead_code)]
    lease_duration: u64,
}

/// List data retrieved from Vault when listing available secrets
#[derive(Debug, Deserialize)]
struct ListSecrets {
    data: BTreeMap<String, Vec<String>>,
}

/// Vault usage mode
#[derive(PartialEq, Debug, Clone)]
pub enum Mode {
    /// Normal HTTP calls to vault returning the actual secret
    Standard,
    /// Not using HTTP calls, just returning dummy data (for tests/CI)
    Mocked,
}

/// A Hashicorp Vault HTTP backend, registered under the `vault://` scheme.
pub struct Vault {
    client: reqwest::Client,
    addr: reqwest::Url,
    token: String,
    mode: Mode,
}

impl Vault {
    /// Initialize using the same evars or token file that the `vault` CLI uses.
    pub fn from_evars() -> Result<Vault> {
        Vault::new(reqwest::Client::new(), &default_addr()?, default_token()?, Mode::Standard)
    }

    /// Initialize using `VAULT_TOKEN` and an address taken from config.
    pub fn regional(vc: &VaultConfig) -> Result<Vault> {
        Vault::new(reqwest::Client::new(), &vc.url, default_token()?, Mode::Standard)
    }

    /// Initialize using dummy values; every read returns fixed garbage.
    pub fn mocked(vc: &VaultConfig) -> Result<Vault> {
        Vault::new(reqwest::Client::new(), &vc.url, "INVALID_TOKEN".to_string(), Mode::Mocked)
    }

    fn new<U, S>(client: reqwest::Client, addr: U, token: S, mode: Mode) -> Result<Vault>
        where U: reqwest::IntoUrl,
              S: Into<String>
    {
        let addr = addr.into_url()?;
        Ok(Vault { client, addr, mode, token: token.into() })
    }

    pub fn mode(&self) -> Mode { self.mode.clone() }

    fn get_secret(&self, path: &str) -> Result<Secret> {
        let url = self.addr.join(&format!("v1/{}", path))?;
        debug!("GET {}", url);

        let mut res = self.client.get(url.clone())
            .header("X-Vault-Token", self.token.clone())
            .send()
            .context(VErrKind::SecretNotAccessible(path.to_string()))?;

        if !res.status().is_success() {
            let status = res.status().to_owned();
            return Err(VErrKind::UnexpectedHttpStatus(status, url.to_string()))?;
        }

        let mut body = String::new();
        res.read_to_string(&mut body)?;
        Ok(serde_json::from_str(&body)?)
    }

    /// List secrets under a path, skipping sub-folders.
    pub fn list(&self, path: &str) -> Result<Vec<String>> {
        let url = self.addr.join(&format!("v1/secret/{}?list=true", path))?;
        debug!("LIST {}", url);

        let mut res = self.client.get(url.clone())
            .header("X-Vault-Token", self.token.clone())
            .send()
            .context(VErrKind::SecretNotAccessible(path.to_string()))?;

        if !res.status().is_success() {
            let status = res.status().to_owned();
            return Err(VErrKind::UnexpectedHttpStatus(status, url.to_string()))?;
        }

        let mut body = String::new();
        res.read_to_string(&mut body)?;
        let lsec: ListSecrets = serde_json::from_str(&body)?;
        if !lsec.data.contains_key("keys") {
            bail!("secret list {} does not contain a keys list from the vault api!?: {}", url, body);
        }
        Ok(lsec.data["keys"].iter()
            .filter(|e| !e.ends_with('/'))
            .map(|e| e.to_string())
            .collect())
    }

    /// Read a single scalar secret value under `secret/<key>`.
    pub fn read(&self, key: &str) -> Result<String> {
        let pth = format!("secret/{}", key);
        if self.mode == Mode::Mocked {
            return Ok("aGVsbG8gd29ybGQ=".into());
        }

        let secret = self.get_secret(&pth).context(VErrKind::SecretNotAccessible(pth.clone()))?;
        secret.data.get("value")
            .cloned()
            .map(String::from)
            .ok_or_else(|| VErrKind::InvalidSecretForm(pth).into())
    }

    /// Read a whole secret's key/value data as a YAML mapping, used when a
    /// `secrets:` entry addresses a folder of values rather than one scalar.
    pub fn read_map(&self, key: &str) -> Result<Mapping> {
        let pth = format!("secret/{}", key);
        if self.mode == Mode::Mocked {
            let mut m = Mapping::new();
            m.insert(YamlValue::String("value".into()), YamlValue::String("aGVsbG8gd29ybGQ=".into()));
            return Ok(m);
        }
        let secret = self.get_secret(&pth).context(VErrKind::SecretNotAccessible(pth))?;
        let mut m = Mapping::new();
        for (k, v) in secret.data {
            m.insert(YamlValue::String(k), YamlValue::String(String::from(v)));
        }
        Ok(m)
    }
}

impl ValueResolver for Vault {
    fn scheme(&self) -> &str { "vault" }

    fn get_string(&self, r: &ValueRef) -> crate::Result<String> {
        self.read(&r.path)
    }

    fn get_map(&self, r: &ValueRef) -> crate::Result<YamlValue> {
        Ok(YamlValue::Mapping(self.read_map(&r.path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mocked_read_is_deterministic() {
        let vc = VaultConfig { url: "https://vault.example.com".into() };
        let client = Vault::mocked(&vc).unwrap();
        assert_eq!(client.read("anything/at/all").unwrap(), "aGVsbG8gd29ybGQ=");
    }

    #[test]
    fn mocked_read_map_has_value_key() {
        let vc = VaultConfig { url: "https://vault.example.com".into() };
        let client = Vault::mocked(&vc).unwrap();
        let m = client.read_map("anything").unwrap();
        assert!(m.contains_key(&YamlValue::String("value".into())));
    }

    #[test]
    fn value_ref_resolves_through_resolver_trait() {
        let vc = VaultConfig { url: "https://vault.example.com".into() };
        let client = Vault::mocked(&vc).unwrap();
        let r = ValueRef::parse("vault://anything").unwrap();
        assert_eq!(ValueResolver::get_string(&client, &r).unwrap(), "aGVsbG8gd29ybGQ=");
    }
}
