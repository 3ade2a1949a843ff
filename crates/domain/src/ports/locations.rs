use crate::DomainResult;
use crate::locations::Location;
use crate::ports::BoxFuture;

#[allow(clippy::needless_pass_by_value)]
pub trait LocationRepository: Send + Sync {
    fn create(&self, location: &Location) -> BoxFuture<'_, DomainResult<Location>>;

    fn get(&self, location_id: &str) -> BoxFuture<'_, DomainResult<Option<Location>>>;

    fn list_recent_by_owner(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<Location>>>;
}
