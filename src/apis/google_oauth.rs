use std::cell::RefCell;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{AuthUrl, ClientId, ClientSecret, RefreshToken, TokenResponse as _, TokenUrl};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

pub type Token = BasicTokenResponse;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Everything the report touches: the sheet it writes plus the two read-only
/// reporting APIs.
pub const SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/analytics.readonly",
    "https://www.googleapis.com/auth/webmasters.readonly",
];

/// Tokens this close to their expiration are treated as already expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Lifetime requested for a service-account assertion; Google caps it at an hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

#[derive(Error, Debug)]
pub enum TryWithCredentialsError {
    #[error("the OAuth credentials are invalid")]
    Unauthorized(anyhow::Error),
    #[error("an error occurred while running an operation using OAuth credentials")]
    Other(#[from] anyhow::Error),
}

/// A Google credentials file, told apart by its `type` field.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    /// An OAuth client plus a refresh token granted for [`SCOPES`].
    AuthorizedUser(AuthorizedUser),
    /// A service-account key; the account needs access to the property, the
    /// site and the spreadsheet.
    ServiceAccount(ServiceAccountKey),
}

#[derive(Deserialize)]
struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    TOKEN_URL.to_owned()
}

/// Claims of the signed assertion exchanged for a service-account token.
#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenWithExpiration {
    token: Token,
    time_obtained: DateTime<Utc>,
}

impl TokenWithExpiration {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(expires_in) = self.token.expires_in() else {
            // no indicated expiration; let the server tell us
            return false;
        };
        let Ok(expires_in) = TimeDelta::from_std(expires_in) else {
            return false;
        };
        self.time_obtained + expires_in - TimeDelta::seconds(EXPIRY_MARGIN_SECS) <= now
    }
}

/// How a new access token is obtained.
enum Grant {
    RefreshToken {
        client: BasicClient,
        refresh_token: RefreshToken,
    },
    ServiceAccount {
        client_email: String,
        key_id: Option<String>,
        signing_key: EncodingKey,
        token_uri: String,
        http: Client,
    },
}

pub struct Credentials {
    grant: Grant,
    cache_file: Option<PathBuf>,
    current: RefCell<Option<TokenWithExpiration>>,
}

impl Credentials {
    /// Loads the credentials file and, if there is one, a previously cached
    /// access token. Service-account token requests go through `http`.
    pub fn load(
        credentials_path: &Path,
        cache_file: Option<PathBuf>,
        http: Client,
    ) -> anyhow::Result<Self> {
        let file = File::open(credentials_path).with_context(|| {
            format!("failed to open credentials file {}", credentials_path.display())
        })?;
        let parsed: CredentialsFile = serde_json::from_reader(BufReader::new(file))
            .with_context(|| {
                format!("failed to parse credentials file {}", credentials_path.display())
            })?;
        let grant = match parsed {
            CredentialsFile::AuthorizedUser(user) => {
                debug!("Using authorized user credentials");
                let client = BasicClient::new(
                    ClientId::new(user.client_id),
                    Some(ClientSecret::new(user.client_secret)),
                    AuthUrl::new(AUTH_URL.to_owned()).context("hardcoded URL should be valid")?,
                    Some(TokenUrl::new(user.token_uri).context("invalid token_uri")?),
                );
                Grant::RefreshToken { client, refresh_token: RefreshToken::new(user.refresh_token) }
            }
            CredentialsFile::ServiceAccount(key) => {
                debug!("Using service account {}", key.client_email);
                let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
                    .context("service account private_key is not a valid RSA key")?;
                Grant::ServiceAccount {
                    client_email: key.client_email,
                    key_id: key.private_key_id,
                    signing_key,
                    token_uri: key.token_uri,
                    http,
                }
            }
        };
        let cached = cache_file.as_deref().and_then(get_cached_token);
        Ok(Self { grant, cache_file, current: RefCell::new(cached) })
    }

    /// Runs an operation that requires an access token. If the operation
    /// reports the token as unauthorized, the token is refreshed and the
    /// operation is run once more.
    pub fn run_with_credentials<F, U>(&self, mut function: F) -> anyhow::Result<U>
    where
        F: FnMut(&Token) -> Result<U, TryWithCredentialsError>,
    {
        let usable = self
            .current
            .borrow()
            .as_ref()
            .map(|token| !token.is_expired(Utc::now()))
            .unwrap_or(false);
        if usable {
            let current = self.current.borrow();
            let token = &current.as_ref().expect("checked above").token;
            trace!("Using existing token to perform operation");
            match function(token) {
                Ok(result) => return Ok(result),
                Err(TryWithCredentialsError::Unauthorized(e)) => {
                    debug!("Existing token is invalid, as indicated by error: {}", e);
                }
                Err(TryWithCredentialsError::Other(e)) => return Err(e),
            }
        } else {
            debug!("No unexpired token available");
        }

        self.refresh()?;
        let current = self.current.borrow();
        let token = &current.as_ref().expect("token was just refreshed").token;
        trace!("Performing operation with refreshed token");
        match function(token) {
            Ok(result) => Ok(result),
            Err(TryWithCredentialsError::Unauthorized(e)) => {
                warn!("The OAuth credentials are invalid even after refreshing the token: {}", e);
                Err(e.context("request was unauthorized with a freshly refreshed token"))
            }
            Err(TryWithCredentialsError::Other(e)) => Err(e),
        }
    }

    fn refresh(&self) -> anyhow::Result<()> {
        trace!("Refreshing access token");
        let time_obtained = Utc::now();
        let token = match &self.grant {
            Grant::RefreshToken { client, refresh_token } => client
                .exchange_refresh_token(refresh_token)
                .request(oauth2::reqwest::http_client)
                .context("failed to refresh OAuth access token")?,
            Grant::ServiceAccount { client_email, key_id, signing_key, token_uri, http } => {
                let assertion =
                    sign_assertion(client_email, key_id.clone(), signing_key, token_uri, time_obtained)?;
                exchange_assertion(http, token_uri, &assertion)?
            }
        };
        debug!("Successfully refreshed token");
        let refreshed = TokenWithExpiration { token, time_obtained };

        if let Some(cache_file) = &self.cache_file {
            debug!("Caching refreshed token to {}", cache_file.display());
            if let Err(e) = write_cached_token(cache_file, &refreshed) {
                warn!("Failed to cache token to {}: {:#}", cache_file.display(), e);
            }
        }
        *self.current.borrow_mut() = Some(refreshed);
        Ok(())
    }
}

fn sign_assertion(
    client_email: &str,
    key_id: Option<String>,
    signing_key: &EncodingKey,
    token_uri: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<String> {
    let claims = AssertionClaims {
        iss: client_email.to_owned(),
        scope: SCOPES.join(" "),
        aud: token_uri.to_owned(),
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };
    let header = Header { kid: key_id, ..Header::new(Algorithm::RS256) };
    jsonwebtoken::encode(&header, &claims, signing_key)
        .context("failed to sign service account assertion")
}

fn exchange_assertion(http: &Client, token_uri: &str, assertion: &str) -> anyhow::Result<Token> {
    let response = http
        .post(token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)])
        .send()
        .context("failed to request service account token")?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(anyhow!("service account token request failed with status code {}: {}", status, body));
    }
    response.json().context("failed to parse service account token response")
}

fn get_cached_token(cache_file: &Path) -> Option<TokenWithExpiration> {
    let file = match File::open(cache_file) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Token cache file does not exist");
            return None;
        }
        Err(e) => {
            warn!("Failed to open token cache file: {}", e);
            return None;
        }
    };
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(cached) => {
            debug!("Loaded cached token from {}", cache_file.display());
            Some(cached)
        }
        Err(e) => {
            warn!("Failed to deserialize cached token: {}", e);
            None
        }
    }
}

fn write_cached_token(cache_file: &Path, token: &TokenWithExpiration) -> anyhow::Result<()> {
    let writer = BufWriter::new(File::create(cache_file)?);
    serde_json::to_writer(writer, token)?;
    Ok(())
}
