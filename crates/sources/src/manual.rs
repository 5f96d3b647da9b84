//! Manually tracked holdings valued with the pricing collaborator.

use crate::adapter::{finish, SourceAdapter};
use crate::context::SourceContext;
use crate::normalize::priced_record;
use async_trait::async_trait;
use portfolio_core::{Credential, ManualHolding, SourceId, SourceOutcome};

pub struct ManualAdapter {
    source_id: SourceId,
    holdings: Vec<ManualHolding>,
}

impl ManualAdapter {
    pub fn new(source_id: SourceId, holdings: Vec<ManualHolding>) -> Self {
        Self {
            source_id,
            holdings,
        }
    }
}

#[async_trait]
impl SourceAdapter for ManualAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "manual"
    }

    async fn fetch(&self, ctx: &SourceContext, _credential: Option<&Credential>) -> SourceOutcome {
        let mut records = Vec::with_capacity(self.holdings.len());
        for holding in &self.holdings {
            records.push(
                priced_record(
                    ctx,
                    &self.source_id,
                    holding.account_type,
                    &holding.symbol,
                    holding.quantity,
                )
                .await
                .with_meta("manual", "true"),
            );
        }
        finish(&self.source_id, ctx, Ok(records))
    }
}
