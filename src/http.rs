//! Ad-hoc query endpoint
//!
//! `GET /query/{addr}/{tag_or_len}` reads one data point on demand:
//! `addr` is a hex data point address and `tag_or_len` either a registry
//! tag (`degC`, `uint8`, ...) or a byte count. Queries share the link's
//! single-request lock with the polling loop, so they simply interleave
//! between polls.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::decode::{self, Codec, TypedValue};
use crate::error::Result;
use crate::transport::OptolinkLink;

/// Build the query router around a shared link
pub fn router(link: Arc<OptolinkLink>) -> Router {
    Router::new()
        .route("/query/:addr/:tag_or_len", get(handle_query))
        .with_state(link)
}

/// Bind and serve the query endpoint; runs until the process exits
pub async fn serve(link: Arc<OptolinkLink>, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Query endpoint listening on port {}", port);
    axum::serve(listener, router(link)).await?;
    Ok(())
}

async fn handle_query(
    State(link): State<Arc<OptolinkLink>>,
    Path((addr, tag_or_len)): Path<(String, String)>,
) -> std::result::Result<String, (StatusCode, String)> {
    let (addr, codec) = parse_query(&addr, &tag_or_len).map_err(internal)?;

    let record = link
        .query(addr, codec.payload_len)
        .await
        .map_err(|e| internal(e.to_string()))?;

    let value = codec
        .decode(&record.payload)
        .map_err(|e| internal(e.to_string()))?;

    Ok(reply_line(addr, &codec, &value))
}

fn parse_query(addr_hex: &str, tag_or_len: &str) -> std::result::Result<(u16, Codec), String> {
    let addr = u16::from_str_radix(addr_hex, 16)
        .map_err(|_| format!("address {:?} not in range 0000..ffff", addr_hex))?;
    let codec = decode::resolve(tag_or_len).map_err(|e| e.to_string())?;
    Ok((addr, codec))
}

fn reply_line(addr: u16, codec: &Codec, value: &TypedValue) -> String {
    format!(
        "{:04x}/{} = {}\n",
        addr,
        codec.payload_len,
        codec.format.render(value)
    )
}

fn internal(reason: String) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, reason)
}
