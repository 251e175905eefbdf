//! Recalculation orchestrator: one run rebuilds a customer's ledger and writes it back.

use crate::config::{Config, RecalcMode, SeedFallback};
use crate::domain::{
    CustomerDerived, CustomerId, Decimal, LedgerError, LedgerState, Order, OrderId, OrderKey, ShareUnit,
};
use crate::engine::LedgerFolder;
use crate::orchestration::reader::{FetchError, HistoryBound, OrderHistoryReader};
use crate::orchestration::writer::{MetafieldKeys, MetafieldWriter, WriteError};
use crate::store::OrderStore;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RecalcError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("seed missing or stale: {reason}")]
    SeedMissingOrStale {
        order: Option<OrderId>,
        reason: String,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("recalculation task aborted: {0}")]
    Aborted(String),
}

impl RecalcError {
    fn stale(order: Option<OrderId>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = match order {
            Some(o) => format!("order {}: {}", o, reason),
            None => reason,
        };
        RecalcError::SeedMissingOrStale { order, reason }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcPhase {
    Start,
    Seeding,
    Fetching,
    Folding,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for RecalcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecalcPhase::Start => "start",
            RecalcPhase::Seeding => "seeding",
            RecalcPhase::Fetching => "fetching",
            RecalcPhase::Folding => "folding",
            RecalcPhase::Writing => "writing",
            RecalcPhase::Done => "done",
            RecalcPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalcReport {
    pub run_id: Uuid,
    pub customer: CustomerId,
    /// Mode the ledger was actually rebuilt in.
    pub mode: RecalcMode,
    /// Set when a Partial trigger fell back to Full.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downgraded: Option<String>,
    pub seed: LedgerState,
    pub orders_folded: usize,
    pub orders_written: usize,
    pub customer_state: CustomerDerived,
}

#[derive(Debug, Clone, Copy)]
pub struct RecalcSettings {
    pub unit: ShareUnit,
    pub mode: RecalcMode,
    pub seed_fallback: SeedFallback,
}

impl From<&Config> for RecalcSettings {
    fn from(config: &Config) -> Self {
        Self {
            unit: config.share_unit,
            mode: config.recalc_mode,
            seed_fallback: config.seed_fallback,
        }
    }
}

impl Default for RecalcSettings {
    fn default() -> Self {
        Self {
            unit: ShareUnit::default(),
            mode: RecalcMode::Full,
            seed_fallback: SeedFallback::Downgrade,
        }
    }
}

/// Where a Partial run starts: the seed state and the first order to refold.
struct SeedPoint {
    state: LedgerState,
    from: OrderKey,
}

/// Rebuilds one customer's ledger per run.
///
/// Partial runs seed from the two-decimal fields stored on the preceding
/// order, so they reproduce a Full run only while every amount is a whole
/// number of cents. A Partial run that reads an amount with more fractional
/// digits applies the seed fallback policy instead of folding it.
#[derive(Debug, Clone)]
pub struct Recalculator {
    store: Arc<dyn OrderStore>,
    reader: OrderHistoryReader,
    folder: LedgerFolder,
    writer: MetafieldWriter,
    settings: RecalcSettings,
}

impl Recalculator {
    pub fn new(store: Arc<dyn OrderStore>, settings: RecalcSettings) -> Self {
        Self::with_keys(store, settings, MetafieldKeys::default())
    }

    pub fn with_keys(store: Arc<dyn OrderStore>, settings: RecalcSettings, keys: MetafieldKeys) -> Self {
        Self {
            reader: OrderHistoryReader::new(store.clone()),
            folder: LedgerFolder::new(settings.unit),
            writer: MetafieldWriter::new(store.clone(), keys),
            store,
            settings,
        }
    }

    pub fn settings(&self) -> RecalcSettings {
        self.settings
    }

    /// Mode a trigger runs in. Triggers without a changed order are always Full.
    pub fn mode_for(&self, changed_order: Option<OrderId>) -> RecalcMode {
        match changed_order {
            Some(_) => self.settings.mode,
            None => RecalcMode::Full,
        }
    }

    /// Rebuild `customer`'s ledger and write it back.
    ///
    /// Full runs are idempotent: rerunning over an unchanged history rewrites
    /// identical values. Runs for one customer must not overlap; see
    /// [`crate::orchestration::CustomerLocks`].
    pub async fn recalculate(
        &self,
        customer: CustomerId,
        changed_order: Option<OrderId>,
    ) -> Result<RecalcReport, RecalcError> {
        self.recalculate_as(customer, changed_order, self.mode_for(changed_order))
            .await
    }

    /// As [`Recalculator::recalculate`] with the mode chosen by the caller.
    pub async fn recalculate_as(
        &self,
        customer: CustomerId,
        changed_order: Option<OrderId>,
        mode: RecalcMode,
    ) -> Result<RecalcReport, RecalcError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("recalc", %run_id, %customer);
        self.run(run_id, customer, changed_order, mode)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        run_id: Uuid,
        customer: CustomerId,
        changed_order: Option<OrderId>,
        mode: RecalcMode,
    ) -> Result<RecalcReport, RecalcError> {
        info!(
            phase = %RecalcPhase::Start,
            ?mode,
            changed_order = ?changed_order.map(|o| o.as_u64()),
            "Recalculation started"
        );

        let result = self.run_phases(run_id, customer, changed_order, mode).await;
        match &result {
            Ok(report) => info!(
                phase = %RecalcPhase::Done,
                mode = ?report.mode,
                orders_folded = report.orders_folded,
                shares = %report.customer_state.cumulative_shares,
                "Recalculation finished"
            ),
            Err(e) => error!(phase = %RecalcPhase::Failed, error = %e, "Recalculation failed"),
        }
        result
    }

    async fn run_phases(
        &self,
        run_id: Uuid,
        customer: CustomerId,
        changed_order: Option<OrderId>,
        requested: RecalcMode,
    ) -> Result<RecalcReport, RecalcError> {
        let mut mode = RecalcMode::Full;
        let mut downgraded = None;

        let seed_point = match (requested, changed_order) {
            (RecalcMode::Partial, Some(order)) => {
                info!(phase = %RecalcPhase::Seeding, order = %order, "Locating seed");
                match self.seed(customer, order).await {
                    Ok(point) => Some(point),
                    Err(e) => {
                        downgraded = Some(self.fall_back(e)?);
                        None
                    }
                }
            }
            _ => None,
        };

        let (mut seed, bound) = match &seed_point {
            Some(point) => (point.state, HistoryBound::From(point.from)),
            None => (LedgerState::zero(), HistoryBound::All),
        };

        info!(phase = %RecalcPhase::Fetching, ?bound, "Reading order history");
        let mut orders = self.reader.fetch_history(customer, bound).await?;

        if seed_point.is_some() {
            match orders.iter().find(|o| !amounts_fit_cents(o)).map(|o| o.id) {
                None => mode = RecalcMode::Partial,
                Some(order) => {
                    let e = RecalcError::stale(
                        Some(order),
                        "amount has more than two fractional digits",
                    );
                    downgraded = Some(self.fall_back(e)?);
                    info!(phase = %RecalcPhase::Fetching, bound = ?HistoryBound::All, "Rereading full history");
                    seed = LedgerState::zero();
                    orders = self.reader.fetch_history(customer, HistoryBound::All).await?;
                }
            }
        }

        info!(phase = %RecalcPhase::Folding, orders = orders.len(), "Folding ledger");
        let fold = self.folder.fold(seed, &orders)?;
        let customer_state = fold.customer_derived();

        info!(phase = %RecalcPhase::Writing, orders = fold.len(), "Writing derived fields");
        let pairs: Vec<_> = fold
            .entries
            .iter()
            .map(|entry| (entry.order_id, entry.derived))
            .collect();
        let summary = self.writer.write(customer, &pairs, &customer_state).await?;

        Ok(RecalcReport {
            run_id,
            customer,
            mode,
            downgraded,
            seed,
            orders_folded: fold.len(),
            orders_written: summary.orders_written,
            customer_state,
        })
    }

    /// Apply the seed fallback policy to a failed seeding step.
    ///
    /// Returns the downgrade reason when the run should continue as Full.
    fn fall_back(&self, err: RecalcError) -> Result<String, RecalcError> {
        match err {
            e @ RecalcError::SeedMissingOrStale { .. } => match self.settings.seed_fallback {
                SeedFallback::Abort => Err(e),
                SeedFallback::Downgrade => {
                    warn!(error = %e, "Seed unusable, downgrading to full recalculation");
                    Ok(e.to_string())
                }
            },
            e => Err(e),
        }
    }

    /// Establish the state just before `changed` from its predecessor's fields.
    ///
    /// The predecessor's stored remainder must agree with its stored spend;
    /// anything else means its last fold did not complete.
    async fn seed(&self, customer: CustomerId, changed: OrderId) -> Result<SeedPoint, RecalcError> {
        let summary = self
            .store
            .get_order(changed)
            .await
            .map_err(FetchError::new)?
            .ok_or_else(|| RecalcError::stale(Some(changed), "changed order not found"))?;
        if summary.customer != Some(customer) {
            return Err(RecalcError::stale(
                Some(changed),
                "changed order belongs to another customer",
            ));
        }
        let from = summary.key();

        let Some(previous) = self
            .store
            .preceding_order(customer, from)
            .await
            .map_err(FetchError::new)?
        else {
            return Ok(SeedPoint {
                state: LedgerState::zero(),
                from,
            });
        };

        let keys = self.writer.keys();
        let spend = self
            .read_decimal(previous, &keys.order_cumulative_spend.namespace, &keys.order_cumulative_spend.key)
            .await?
            .ok_or_else(|| RecalcError::stale(Some(previous), "cumulative spend missing"))?;
        if spend.is_negative() {
            return Err(RecalcError::stale(Some(previous), "cumulative spend is negative"));
        }
        let remainder = self
            .read_decimal(previous, &keys.order_remainder.namespace, &keys.order_remainder.key)
            .await?
            .ok_or_else(|| RecalcError::stale(Some(previous), "remainder missing"))?;

        let state = LedgerState::from_spend(spend, self.settings.unit)?;
        if state.remainder.to_fixed_2() != remainder.to_fixed_2() {
            return Err(RecalcError::stale(
                Some(previous),
                format!(
                    "remainder {} disagrees with cumulative spend {}",
                    remainder.to_fixed_2(),
                    spend.to_fixed_2()
                ),
            ));
        }

        info!(seed_order = %previous, spend = %spend, "Seed established");
        Ok(SeedPoint { state, from })
    }

    async fn read_decimal(
        &self,
        order: OrderId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<Decimal>, RecalcError> {
        let raw = self
            .store
            .get_order_metafield(order, namespace, key)
            .await
            .map_err(FetchError::new)?;
        match raw {
            None => Ok(None),
            Some(value) => Decimal::from_str_canonical(&value).map(Some).map_err(|_| {
                RecalcError::stale(
                    Some(order),
                    format!("{}.{} is not a decimal: {}", namespace, key, value),
                )
            }),
        }
    }
}

/// Subtotal and refunds are whole cents, so the two-decimal write-back is exact.
fn amounts_fit_cents(order: &Order) -> bool {
    order.subtotal.fits_cents() && order.refunds.iter().all(Decimal::fits_cents)
}
