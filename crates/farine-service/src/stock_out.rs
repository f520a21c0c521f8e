//! # Stock-Out Reconciler
//!
//! ```text
//! reason, bags │ amount ──► figures (amount wins) ──► session ──► WDR/ref
//!      │
//!      ▼
//! INSERT stock_withdrawal
//!      │
//!      ▼
//! SAVEPOINT ──► INSERT shadow delivery (order = none) ──► RELEASE
//!      │                          │ error
//!      │                          └──► ROLLBACK TO SAVEPOINT, withdrawal kept
//!      ▼
//! recompute session aggregates
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqliteConnection};
use tracing::{info, warn};
use uuid::Uuid;

use farine_core::stock_out::{derive_figures, parse_withdrawal_input, shadow_note};
use farine_core::validation::{validate_notes, validate_reason, validate_required_text};
use farine_core::{
    Actor, Delivery, Money, PaymentType, StockWithdrawal, WithdrawalType, MAX_NAME_LEN,
};
use farine_db::repository::sequence;
use farine_db::{
    DeliveryRepository, ParameterRepository, SequenceRepository, SessionRepository,
    WithdrawalRepository,
};

use crate::config::SessionSettings;
use crate::error::{ServiceError, ServiceResult};
use crate::resolver::resolve_for_write;

/// Raw withdrawal input. Quantity and amount arrive as text so that
/// unparsable values are reported as such.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub reason: Option<String>,
    /// Bags.
    pub quantity: Option<String>,
    pub amount: Option<String>,
    #[serde(default)]
    pub withdrawal_type: WithdrawalType,
    pub responsible_party: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl WithdrawalRequest {
    pub fn bags(reason: impl Into<String>, quantity: impl Into<String>) -> Self {
        WithdrawalRequest {
            reason: Some(reason.into()),
            quantity: Some(quantity.into()),
            ..Default::default()
        }
    }

    pub fn amount(reason: impl Into<String>, amount: impl Into<String>) -> Self {
        WithdrawalRequest {
            reason: Some(reason.into()),
            amount: Some(amount.into()),
            ..Default::default()
        }
    }

    pub fn of_type(mut self, withdrawal_type: WithdrawalType) -> Self {
        self.withdrawal_type = withdrawal_type;
        self
    }

    pub fn responsible(mut self, party: impl Into<String>) -> Self {
        self.responsible_party = Some(party.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedWithdrawal {
    pub withdrawal: StockWithdrawal,
    /// Missing when the shadow write failed.
    pub shadow: Option<Delivery>,
}

pub async fn record_withdrawal(
    conn: &mut SqliteConnection,
    settings: &SessionSettings,
    actor: &Actor,
    request: &WithdrawalRequest,
    now: DateTime<Utc>,
) -> ServiceResult<RecordedWithdrawal> {
    let reason = validate_reason(request.reason.as_deref())?;
    let notes = validate_notes(request.notes.as_deref())?;
    let responsible_party = match request.responsible_party.as_deref() {
        Some(party) if !party.trim().is_empty() => {
            Some(validate_required_text("responsible_party", party, MAX_NAME_LEN)?)
        }
        _ => None,
    };
    let input = parse_withdrawal_input(request.quantity.as_deref(), request.amount.as_deref())?;

    let session =
        resolve_for_write(conn, actor, settings, request.session_id.as_deref(), now).await?;

    let mut params = ParameterRepository::new(conn);
    let price = params.price_per_bag().await?;
    let weight = params.weight_per_bag_kg().await?;
    let figures = derive_figures(input, price, weight)?;

    let reference = SequenceRepository::new(conn).next(sequence::WITHDRAWAL).await?;

    let withdrawal = StockWithdrawal {
        id: Uuid::new_v4().to_string(),
        reference,
        session_id: session.id.clone(),
        withdrawn_at: now,
        reason,
        bags_quantity: figures.bags,
        kg_quantity: figures.kg,
        amount_cents: figures.amount.cents(),
        withdrawal_type: request.withdrawal_type,
        responsible_party,
        notes,
        validated: false,
        created_at: now,
    };
    WithdrawalRepository::new(conn).insert(&withdrawal).await?;

    let shadow = match write_shadow(conn, actor, &withdrawal, price, now).await {
        Ok(shadow) => Some(shadow),
        Err(e) => {
            warn!(
                error = %e,
                withdrawal_id = %withdrawal.id,
                "Shadow delivery not written, withdrawal kept"
            );
            None
        }
    };

    SessionRepository::new(conn)
        .recompute_totals(&session.id, now)
        .await?;

    info!(
        withdrawal_id = %withdrawal.id,
        session_id = %session.id,
        bags = withdrawal.bags_quantity,
        amount = %figures.amount,
        "Stock withdrawal recorded"
    );
    Ok(RecordedWithdrawal { withdrawal, shadow })
}

/// Writes the shadow delivery inside a savepoint of the caller's transaction.
async fn write_shadow(
    conn: &mut SqliteConnection,
    actor: &Actor,
    withdrawal: &StockWithdrawal,
    price: Money,
    now: DateTime<Utc>,
) -> ServiceResult<Delivery> {
    let mut savepoint = conn.begin().await?;

    let reference = SequenceRepository::new(&mut savepoint)
        .next(sequence::DELIVERY)
        .await?;
    let amount = Money::from_cents(withdrawal.amount_cents);

    let shadow = Delivery {
        id: Uuid::new_v4().to_string(),
        reference,
        order_id: None,
        session_id: withdrawal.session_id.clone(),
        delivered_at: now,
        amount_cents: amount.cents(),
        bag_price_cents: price.cents(),
        bags_count: withdrawal.bags_quantity,
        payment_type: PaymentType::Cash,
        courier_name: actor.display_name.clone(),
        courier_user_id: actor.user_id.clone(),
        notes: Some(shadow_note(
            withdrawal.notes.as_deref(),
            &withdrawal.reason,
            withdrawal.bags_quantity,
            amount,
        )),
        is_stock_withdrawal: true,
        created_at: now,
    };
    DeliveryRepository::new(&mut savepoint).insert(&shadow).await?;

    savepoint.commit().await?;
    Ok(shadow)
}

/// Marks a withdrawal validated. Owner of its session or administrator.
pub async fn validate_withdrawal(
    conn: &mut SqliteConnection,
    actor: &Actor,
    withdrawal_id: &str,
) -> ServiceResult<StockWithdrawal> {
    let withdrawal = WithdrawalRepository::new(conn)
        .get_required(withdrawal_id)
        .await?;
    let session = SessionRepository::new(conn)
        .get_required(&withdrawal.session_id)
        .await?;
    if !actor.can_manage(&session.courier_user_id) {
        return Err(ServiceError::forbidden(
            &actor.user_id,
            "validate withdrawals of",
            &session.id,
        ));
    }

    if withdrawal.validated {
        return Ok(withdrawal);
    }

    let mut withdrawals = WithdrawalRepository::new(conn);
    withdrawals.mark_validated(withdrawal_id).await?;
    info!(withdrawal_id, "Stock withdrawal validated");
    Ok(withdrawals.get_required(withdrawal_id).await?)
}
