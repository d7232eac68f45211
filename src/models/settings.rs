//! Operator-editable broker settings.

use crate::errors::BrokerError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Canned ACL applied to uploaded objects.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AccessControl {
    #[default]
    #[serde(rename = "public-read")]
    PublicRead,
    #[serde(rename = "private")]
    Private,
}

impl AccessControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessControl::PublicRead => "public-read",
            AccessControl::Private => "private",
        }
    }
}

impl fmt::Display for AccessControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessControl {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public-read" => Ok(AccessControl::PublicRead),
            "private" => Ok(AccessControl::Private),
            other => Err(BrokerError::InvalidSetting {
                name: "access_control".into(),
                reason: format!("`{}` is not one of public-read, private", other),
            }),
        }
    }
}

/// Scheme of the form action the browser posts to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadScheme {
    #[default]
    Http,
    Https,
}

impl UploadScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadScheme::Http => "http",
            UploadScheme::Https => "https",
        }
    }
}

impl fmt::Display for UploadScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadScheme {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(UploadScheme::Http),
            "https" => Ok(UploadScheme::Https),
            other => Err(BrokerError::InvalidSetting {
                name: "upload_scheme".into(),
                reason: format!("`{}` is not one of http, https", other),
            }),
        }
    }
}

/// Settings edited from the admin surface.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct BrokerSettings {
    /// Origins allowed to POST uploads, separated by commas or spaces.
    /// One `*` wildcard segment is accepted (e.g. `*.example.com`).
    #[serde(default)]
    pub cors_origin: String,

    #[serde(default)]
    pub upload_scheme: UploadScheme,

    #[serde(default)]
    pub access_control: AccessControl,
}

impl BrokerSettings {
    /// Configured origins, split on commas and spaces.
    pub fn origins(&self) -> Vec<&str> {
        self.cors_origin
            .split([',', ' '])
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .collect()
    }
}
