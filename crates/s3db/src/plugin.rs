//! The `Plugin` capability trait: anything that attaches itself to a
//! live `Database` and reacts to its event bus (spec §1's "external
//! collaborator" interface — replicators, schedulers, custom drivers).

use crate::Database;
use s3db_common::Error;
use std::sync::Arc;

#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Called once after `Database::connect`. Plugins subscribe to
    /// `db.events()` for whatever they need to react to.
    async fn attach(&self, db: &Arc<Database>) -> Result<(), Error>;
}
