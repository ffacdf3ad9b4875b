// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod db_connection;
mod db_connection_pool;
mod db_connection_pool_manager;
mod db_pool_events;
mod sqlx_connection_pool;

pub use db_connection::*;
pub use db_connection_pool::*;
pub use db_connection_pool_manager::*;
pub use db_pool_events::*;
pub use sqlx_connection_pool::*;
