// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use dill::*;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Abstracts access to the wall clock so that time-dependent logic can be
/// tested deterministically
pub trait SystemTimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub struct SystemTimeSourceDefault;

#[component(pub)]
#[interface(dyn SystemTimeSource)]
#[scope(Singleton)]
impl SystemTimeSourceDefault {
    pub fn new() -> Self {
        Self
    }
}

impl SystemTimeSource for SystemTimeSourceDefault {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Manually driven clock. Clones share the same instant, so a test can keep
/// one handle while another one is injected into the code under test.
#[derive(Debug, Clone)]
pub struct SystemTimeSourceStub {
    t: Arc<Mutex<DateTime<Utc>>>,
}

impl SystemTimeSourceStub {
    pub fn new() -> Self {
        Self::new_set(Utc.with_ymd_and_hms(2050, 1, 1, 12, 0, 0).unwrap())
    }

    pub fn new_set(t: DateTime<Utc>) -> Self {
        Self {
            t: Arc::new(Mutex::new(t)),
        }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.t.lock().unwrap() = t;
    }

    pub fn advance(&self, duration: Duration) -> DateTime<Utc> {
        let mut t = self.t.lock().unwrap();
        *t += duration;
        *t
    }
}

impl Default for SystemTimeSourceStub {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemTimeSource for SystemTimeSourceStub {
    fn now(&self) -> DateTime<Utc> {
        *self.t.lock().unwrap()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
