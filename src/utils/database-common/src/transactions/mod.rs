// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod db_transaction_manager;
mod db_transaction_runner;
mod transaction_error;
mod transaction_manager_factory;
mod transaction_options;
mod transaction_record;

pub use db_transaction_manager::*;
pub use db_transaction_runner::*;
pub use transaction_error::*;
pub use transaction_manager_factory::*;
pub use transaction_options::*;
pub use transaction_record::*;
