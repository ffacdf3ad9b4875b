// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod db_configuration;
mod db_error;
mod db_provider;
mod metrics;
mod plugins;
mod pool;
mod services;
mod transactions;

#[cfg(any(feature = "testing", test))]
pub mod testing;

pub use db_configuration::*;
pub use db_error::*;
pub use db_provider::*;
pub use metrics::*;
pub use plugins::*;
pub use pool::*;
pub use services::*;
pub use transactions::*;
