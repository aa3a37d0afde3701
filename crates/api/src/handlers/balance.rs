use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: i64,
}

/// GET /api/v1/balance
pub async fn get_balance(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<BalanceResponse>>> {
    let balance = state.ledger.balance(auth.user_id).await?;
    Ok(Json(DataResponse {
        data: BalanceResponse { balance },
    }))
}
