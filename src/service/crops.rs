use sqlx::{Pool, Postgres};

use crate::{
    dao::crops::CropYieldDao,
    model::{
        apperror::ApplicationError,
        models::{CropYield, CropYieldFilter, CropYieldInputType, ListOutputType, PaginationInput},
    },
    service::{acquire, begin, connection_pool, finish},
};

/**
 * Represents the service for crop yields.
 */
pub struct CropYieldService {
    crop_yield_dao: CropYieldDao,
    /**
     * Optional connection pool. `None` until the runtime is initialized.
     */
    connection_pool: Option<Pool<Postgres>>,
}

impl CropYieldService {
    pub fn new(crop_yield_dao: CropYieldDao, connection_pool: Option<Pool<Postgres>>) -> Self {
        CropYieldService { crop_yield_dao, connection_pool }
    }

    /**
     * Adds a crop yield.
     *
     * # Arguments
     * `crop_yield_input`: The crop yield to add. An empty state makes it a national-level record.
     *
     * # Returns
     * The stored row, or a `Conflict` error when the year, crop type, country and state combination exists.
     */
    pub async fn add_crop_yield(&self, crop_yield_input: CropYieldInputType) -> Result<CropYield, ApplicationError> {
        let crop_yield_input = crop_yield_input.validate()?;
        let mut transaction = begin(connection_pool(&self.connection_pool)?).await?;
        let result = self.crop_yield_dao.add_crop_yield(&mut transaction, &crop_yield_input).await;
        finish(transaction, result).await
    }

    pub async fn upsert_crop_yield(&self, crop_yield_input: CropYieldInputType) -> Result<CropYield, ApplicationError> {
        let crop_yield_input = crop_yield_input.validate()?;
        let mut transaction = begin(connection_pool(&self.connection_pool)?).await?;
        let result = self.crop_yield_dao.upsert_crop_yield(&mut transaction, &crop_yield_input).await;
        finish(transaction, result).await
    }

    pub async fn update_crop_yield(&self, crop_yield_id: i64, crop_yield_input: CropYieldInputType) -> Result<CropYield, ApplicationError> {
        let crop_yield_input = crop_yield_input.validate()?;
        let mut transaction = begin(connection_pool(&self.connection_pool)?).await?;
        let result = self.crop_yield_dao.update_crop_yield(&mut transaction, crop_yield_id, &crop_yield_input).await;
        finish(transaction, result).await
    }

    pub async fn get_crop_yield(&self, crop_yield_id: i64) -> Result<CropYield, ApplicationError> {
        let mut connection = acquire(connection_pool(&self.connection_pool)?).await?;
        self.crop_yield_dao.get_crop_yield(&mut connection, crop_yield_id).await
    }

    pub async fn list_crop_yields(&self, pagination_input: PaginationInput, filter: CropYieldFilter) -> Result<ListOutputType<CropYield>, ApplicationError> {
        let pagination_input = pagination_input.validate()?;
        let filter = filter.validate()?;
        let mut connection = acquire(connection_pool(&self.connection_pool)?).await?;
        self.crop_yield_dao.list_crop_yields(&mut connection, pagination_input, filter).await
    }

    pub async fn delete_crop_yield(&self, crop_yield_id: i64) -> Result<(), ApplicationError> {
        let mut transaction = begin(connection_pool(&self.connection_pool)?).await?;
        let result = self.crop_yield_dao.delete_crop_yield(&mut transaction, crop_yield_id).await;
        finish(transaction, result).await
    }
}


#[cfg(feature = "integration-test")]
#[cfg(test)]
mod integration_test {
    use sqlx::PgPool;

    use super::*;
    use crate::model::apperror::ErrorType;
    use crate::service::migrator::MigrationService;

    #[sqlx::test(migrations = false)]
    async fn test_conflict_then_upsert(pool: PgPool) {
        MigrationService::new(Some(pool.clone())).migrate().await.unwrap();
        let crop_yield_service = CropYieldService::new(CropYieldDao::new(), Some(pool));
        crop_yield_service.add_crop_yield(CropYieldInputType::new(2018, 364_262)).await.unwrap();
        let error = crop_yield_service.add_crop_yield(CropYieldInputType::new(2018, 1)).await.err().unwrap();
        assert!(error.is_conflict());
        let replaced = crop_yield_service.upsert_crop_yield(CropYieldInputType::new(2018, 364_300)).await.unwrap();
        assert_eq!(replaced.yield_value, 364_300);
        let listed = crop_yield_service.list_crop_yields(PaginationInput::default(), CropYieldFilter { year_from: Some(2018), year_to: Some(2018), ..Default::default() }).await.unwrap();
        assert_eq!(listed.elements.len(), 1);
    }
}
