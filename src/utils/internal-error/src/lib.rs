// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// An error that is not expected to be handled by the caller beyond being
/// reported. Carries the original cause as its source and an optional
/// free-form context that is attached at the conversion site.
#[derive(Error, Debug)]
#[error("Internal error")]
pub struct InternalError {
    #[source]
    source: BoxedError,
    context: Option<String>,
}

impl InternalError {
    pub fn new<E: Into<BoxedError>>(e: E) -> Self {
        Self {
            source: e.into(),
            context: None,
        }
    }

    pub fn with_context<E: Into<BoxedError>>(e: E, context: impl Into<String>) -> Self {
        Self {
            source: e.into(),
            context: Some(context.into()),
        }
    }

    pub fn bail<T>(reason: impl Into<String>) -> Result<T, Self> {
        Err(Self::new(InternalErrorBail::new(reason)))
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Human-readable description of the root cause, suitable for logs
    pub fn reason(&self) -> String {
        match &self.context {
            Some(context) => format!("Internal error: {} (context: {context})", self.source),
            None => format!("Internal error: {}", self.source),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
#[error("{reason}")]
struct InternalErrorBail {
    reason: String,
}

impl InternalErrorBail {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub trait ErrorIntoInternal {
    fn int_err(self) -> InternalError;

    fn context_int_err(self, context: impl Into<String>) -> InternalError;
}

impl<E> ErrorIntoInternal for E
where
    E: Into<BoxedError>,
{
    fn int_err(self) -> InternalError {
        InternalError::new(self)
    }

    fn context_int_err(self, context: impl Into<String>) -> InternalError {
        InternalError::with_context(self, context)
    }
}

pub trait ResultIntoInternal<OK> {
    fn int_err(self) -> Result<OK, InternalError>;

    fn context_int_err(self, context: impl Into<String>) -> Result<OK, InternalError>;
}

impl<OK, E> ResultIntoInternal<OK> for Result<OK, E>
where
    E: Into<BoxedError>,
{
    fn int_err(self) -> Result<OK, InternalError> {
        self.map_err(ErrorIntoInternal::int_err)
    }

    fn context_int_err(self, context: impl Into<String>) -> Result<OK, InternalError> {
        self.map_err(|e| e.context_int_err(context))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
