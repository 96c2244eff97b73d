use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};

use crate::server::AppState;
use crate::server::dto::{ConvertParams, ConvertResponse, PriceFormatter};
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::server::validation::validate_amount;
use crate::types::{Currency, User, convert, format_price};

fn parse_currency(code: &str) -> Result<Currency, ApiError> {
    Currency::parse(code)
        .ok_or_else(|| ApiError::bad_request(format!("Unsupported currency: {code}")))
}

/// Display currency for a request: an explicit `?currency=`, then the signed-in
/// user's preference, then the configured default.
pub(crate) fn resolve_prices(
    state: &AppState,
    requested: Option<&str>,
    user: Option<&User>,
) -> Result<PriceFormatter, ApiError> {
    let base = state.config.commerce.base_currency;

    if let Some(code) = requested.filter(|c| !c.trim().is_empty()) {
        return Ok(PriceFormatter {
            base,
            display: parse_currency(code)?,
        });
    }

    let preferred = match user {
        Some(user) => state
            .store
            .get_preferences(&user.id)
            .api_err("Preferences")?
            .map(|prefs| prefs.currency),
        None => None,
    };

    Ok(PriceFormatter {
        base,
        display: preferred.unwrap_or(state.config.commerce.display_currency),
    })
}

pub async fn convert_amount(
    State(_state): State<Arc<AppState>>,
    Query(params): Query<ConvertParams>,
) -> Result<impl IntoResponse, ApiError> {
    let from = parse_currency(&params.from)?;
    let to = parse_currency(&params.to)?;
    validate_amount(params.amount)?;
    let converted = convert(params.amount, from, to)
        .ok_or_else(|| ApiError::bad_request("Amount is too large to convert"))?;

    Ok(Json(ApiResponse::success(ConvertResponse {
        amount: params.amount,
        from,
        to,
        converted,
        formatted: format_price(converted, to),
    })))
}
