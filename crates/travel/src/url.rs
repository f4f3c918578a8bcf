use levelflow_common::PackageName;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::controller::TravelError;

/// A travel destination: `Map?Key=Value?Flag#Portal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelUrl {
    pub map: String,
    /// `Key=Value` or bare `Flag` entries, in order.
    pub options: Vec<String>,
    pub portal: Option<String>,
}

impl TravelUrl {
    /// Map used as the neutral midpoint of a seamless travel.
    pub const DEFAULT_TRANSITION_MAP: &'static str = "Entry";

    /// Option that re-travels to the last committed URL.
    pub const RESTART: &'static str = "restart";

    pub fn new(map: impl Into<String>) -> Self {
        Self {
            map: map.into(),
            options: Vec::new(),
            portal: None,
        }
    }

    pub fn parse(text: &str) -> Result<Self, TravelError> {
        let text = text.trim();
        let invalid = |reason: &str| TravelError::InvalidUrl {
            url: text.to_string(),
            reason: reason.to_string(),
        };
        if text.is_empty() {
            return Err(invalid("empty url"));
        }
        let (body, portal) = match text.split_once('#') {
            Some((body, portal)) if !portal.is_empty() => (body, Some(portal.to_string())),
            Some((body, _)) => (body, None),
            None => (text, None),
        };
        let mut parts = body.split('?');
        let map = parts.next().unwrap_or_default().trim();
        if map.chars().any(char::is_whitespace) {
            return Err(invalid("map name contains whitespace"));
        }
        let options: Vec<String> = parts
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if map.is_empty() && !options.iter().any(|o| o.eq_ignore_ascii_case(Self::RESTART)) {
            return Err(invalid("missing map name"));
        }
        Ok(Self {
            map: map.to_string(),
            options,
            portal,
        })
    }

    pub fn map_name(&self) -> PackageName {
        PackageName::new(self.map.clone())
    }

    fn key_of(option: &str) -> &str {
        option.split_once('=').map_or(option, |(k, _)| k)
    }

    pub fn has_option(&self, key: &str) -> bool {
        self.options.iter().any(|o| Self::key_of(o).eq_ignore_ascii_case(key))
    }

    /// Value of `Key=Value`; `Some("")` for a bare flag.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|o| Self::key_of(o).eq_ignore_ascii_case(key))
            .map(|o| o.split_once('=').map_or("", |(_, v)| v))
    }

    /// Add or replace an option.
    pub fn set_option(&mut self, option: impl Into<String>) {
        let option = option.into();
        let key = Self::key_of(&option).to_string();
        self.options.retain(|o| !Self::key_of(o).eq_ignore_ascii_case(&key));
        self.options.push(option);
    }

    pub fn is_restart(&self) -> bool {
        self.has_option(Self::RESTART)
    }
}

impl fmt::Display for TravelUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.map)?;
        for option in &self.options {
            write!(f, "?{option}")?;
        }
        if let Some(portal) = &self.portal {
            write!(f, "#{portal}")?;
        }
        Ok(())
    }
}
