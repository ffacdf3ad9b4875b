// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Implemented by components that own prometheus collectors
pub trait MetricsProvider: Send + Sync {
    fn register(&self, reg: &prometheus::Registry) -> prometheus::Result<()>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub fn register_all(
    providers: &[Arc<dyn MetricsProvider>],
) -> prometheus::Result<prometheus::Registry> {
    let reg = prometheus::Registry::new();

    for provider in providers {
        provider.register(&reg)?;
    }

    Ok(reg)
}

/// Renders all collectors of the registry in the text exposition format
pub fn render_text(reg: &prometheus::Registry) -> prometheus::Result<String> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&reg.gather(), &mut buf)?;

    String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
