//! Canonical DOI URLs built from the identifier alone. No external call.

use super::{BatchContext, StageRunner};
use async_trait::async_trait;
use collector_common::config::ApiConfig;
use collector_common::db::models::{Identifier, UrlType};
use collector_common::{doi, Result, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalForm {
    /// `https://doi.org/{doi}`
    New,
    /// `http://dx.doi.org/{quoted doi}`
    Old,
}

pub struct CanonicalRunner {
    form: CanonicalForm,
    base: String,
}

impl CanonicalRunner {
    pub fn new(form: CanonicalForm, apis: &ApiConfig) -> Self {
        let base = match form {
            CanonicalForm::New => &apis.doi_resolver_base,
            CanonicalForm::Old => &apis.doi_legacy_base,
        };
        Self {
            form,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, doi: &str) -> String {
        match self.form {
            CanonicalForm::New => format!("{}/{}", self.base, doi),
            CanonicalForm::Old => format!("{}/{}", self.base, doi::quote_path(doi)),
        }
    }

    fn url_type(&self) -> UrlType {
        match self.form {
            CanonicalForm::New => UrlType::DoiNew,
            CanonicalForm::Old => UrlType::DoiOld,
        }
    }
}

#[async_trait]
impl StageRunner for CanonicalRunner {
    fn stage(&self) -> Stage {
        match self.form {
            CanonicalForm::New => Stage::DoiNew,
            CanonicalForm::Old => Stage::DoiOld,
        }
    }

    async fn run_batch(&self, ctx: &mut BatchContext<'_>, batch: &[Identifier]) -> Result<()> {
        for identifier in batch {
            ctx.add_url(&identifier.doi, self.url_for(&identifier.doi), self.url_type());
            ctx.complete(&identifier.doi);
            ctx.processed();
        }
        Ok(())
    }
}
