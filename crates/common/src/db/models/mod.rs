//! SeaORM entity models
//!
//! Tables: imports, dois, urls, requests, fbrequests

pub mod import;
pub mod doi;
pub mod url;
pub mod request;
pub mod engagement;

pub use import::{
    Entity as ImportEntity,
    Model as Import,
    ActiveModel as ImportActiveModel,
    Column as ImportColumn,
};

pub use doi::{
    Entity as IdentifierEntity,
    Model as Identifier,
    ActiveModel as IdentifierActiveModel,
    Column as IdentifierColumn,
};

pub use url::{
    Entity as UrlEntity,
    Model as DerivedUrl,
    ActiveModel as UrlActiveModel,
    Column as UrlColumn,
    UrlType,
};

pub use request::{
    Entity as RequestLogEntity,
    Model as RequestLog,
    ActiveModel as RequestLogActiveModel,
    Column as RequestLogColumn,
};

pub use engagement::{
    Entity as EngagementEntity,
    Model as EngagementRecord,
    ActiveModel as EngagementActiveModel,
    Column as EngagementColumn,
};
