// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod ring_buffer;
mod transaction_metrics;
mod transaction_watchdog;

pub use ring_buffer::*;
pub use transaction_metrics::*;
pub use transaction_watchdog::*;
