//! Store actions.

use super::error::FetchError;
use super::fetcher::Payload;

/// Prefix shared by every action the cache reducer understands.
pub const ACTION_NAMESPACE: &str = "@fetchcache/";

pub const IS_LOADING: &str = "@fetchcache/IS_LOADING";
pub const SET_DATA: &str = "@fetchcache/SET_DATA";
pub const DELETE_DATA: &str = "@fetchcache/DELETE_DATA";
pub const ERROR: &str = "@fetchcache/ERROR";
pub const CLEAR_ERROR: &str = "@fetchcache/CLEAR_ERROR";

/// A state transition request for the cache store.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Loading { hash: String },
    /// `value` is `None` when a fetcher settled without a payload.
    SetData { hash: String, value: Option<Payload> },
    Error { hash: String, error: FetchError },
    DeleteData { hash: String },
    ClearError { hash: String },
    /// Any other action travelling through the same dispatch channel.
    Foreign { action_type: String },
}

impl Action {
    pub fn loading(hash: impl Into<String>) -> Self {
        Self::Loading { hash: hash.into() }
    }

    pub fn set_data(hash: impl Into<String>, value: impl Into<Option<Payload>>) -> Self {
        Self::SetData {
            hash: hash.into(),
            value: value.into(),
        }
    }

    pub fn error(hash: impl Into<String>, error: FetchError) -> Self {
        Self::Error {
            hash: hash.into(),
            error,
        }
    }

    pub fn delete_data(hash: impl Into<String>) -> Self {
        Self::DeleteData { hash: hash.into() }
    }

    pub fn clear_error(hash: impl Into<String>) -> Self {
        Self::ClearError { hash: hash.into() }
    }

    pub fn foreign(action_type: impl Into<String>) -> Self {
        Self::Foreign {
            action_type: action_type.into(),
        }
    }

    pub fn action_type(&self) -> &str {
        match self {
            Self::Loading { .. } => IS_LOADING,
            Self::SetData { .. } => SET_DATA,
            Self::Error { .. } => ERROR,
            Self::DeleteData { .. } => DELETE_DATA,
            Self::ClearError { .. } => CLEAR_ERROR,
            Self::Foreign { action_type } => action_type.as_str(),
        }
    }

    pub fn hash(&self) -> Option<&str> {
        match self {
            Self::Loading { hash }
            | Self::SetData { hash, .. }
            | Self::Error { hash, .. }
            | Self::DeleteData { hash }
            | Self::ClearError { hash } => Some(hash.as_str()),
            Self::Foreign { .. } => None,
        }
    }

    pub fn is_namespaced(&self) -> bool {
        self.action_type().starts_with(ACTION_NAMESPACE)
    }
}
