//! Derived URL entity. The URL string is the primary key, so a URL exists
//! at most once across all identifiers and url types.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Origin of a stored URL
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlType {
    Ojs,
    Seed,
    DoiNew,
    DoiOld,
    DoiLandingPage,
    Pubmed,
    PubmedCentral,
    UnpaywallDoiUrl,
    UnpaywallUrl,
    UnpaywallUrlForPdf,
    UnpaywallUrlForLandingPage,
}

impl UrlType {
    pub fn as_str(self) -> &'static str {
        match self {
            UrlType::Ojs => "ojs",
            UrlType::Seed => "seed",
            UrlType::DoiNew => "doi_new",
            UrlType::DoiOld => "doi_old",
            UrlType::DoiLandingPage => "doi_landingpage",
            UrlType::Pubmed => "pm",
            UrlType::PubmedCentral => "pmc",
            UrlType::UnpaywallDoiUrl => "unpaywall_doi_url",
            UrlType::UnpaywallUrl => "unpaywall_url",
            UrlType::UnpaywallUrlForPdf => "unpaywall_url_for_pdf",
            UrlType::UnpaywallUrlForLandingPage => "unpaywall_url_for_landing_page",
        }
    }

    /// Map the url_type column of an import row. Unknown or missing
    /// types are stored as `seed`.
    pub fn from_seed(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("ojs") => UrlType::Ojs,
            Some("doi_new") => UrlType::DoiNew,
            Some("doi_old") => UrlType::DoiOld,
            Some("doi_new_landingpage") | Some("doi_landingpage") => UrlType::DoiLandingPage,
            Some("pubmed") | Some("pm") => UrlType::Pubmed,
            Some("pubmedcentral") | Some("pmc") => UrlType::PubmedCentral,
            Some("unpaywall") | Some("unpaywall_url") => UrlType::UnpaywallUrl,
            _ => UrlType::Seed,
        }
    }
}

impl From<String> for UrlType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ojs" => UrlType::Ojs,
            "doi_new" => UrlType::DoiNew,
            "doi_old" => UrlType::DoiOld,
            "doi_landingpage" => UrlType::DoiLandingPage,
            "pm" => UrlType::Pubmed,
            "pmc" => UrlType::PubmedCentral,
            "unpaywall_doi_url" => UrlType::UnpaywallDoiUrl,
            "unpaywall_url" => UrlType::UnpaywallUrl,
            "unpaywall_url_for_pdf" => UrlType::UnpaywallUrlForPdf,
            "unpaywall_url_for_landing_page" => UrlType::UnpaywallUrlForLandingPage,
            _ => UrlType::Seed,
        }
    }
}

impl From<UrlType> for String {
    fn from(url_type: UrlType) -> Self {
        url_type.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "urls")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub url: String,

    #[sea_orm(column_type = "Text")]
    pub doi: String,

    #[sea_orm(column_type = "Text")]
    pub url_type: String,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn url_type(&self) -> UrlType {
        UrlType::from(self.url_type.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::doi::Entity",
        from = "Column::Doi",
        to = "super::doi::Column::Doi"
    )]
    Doi,

    #[sea_orm(has_many = "super::engagement::Entity")]
    Engagements,
}

impl Related<super::doi::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Doi.def()
    }
}

impl Related<super::engagement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Engagements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
