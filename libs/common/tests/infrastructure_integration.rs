//! Integration tests for the infrastructure components
//!
//! These need a PostgreSQL and a Redis reachable through `DATABASE_URL` and
//! `REDIS_URL`; run them with `cargo test -- --ignored`.

use common::{
    cache::{RedisConfig, RedisPool},
    database::{DatabaseConfig, health_check, init_pool, run_migrations},
};
use sqlx::Row;

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn test_infrastructure_integration() -> Result<(), Box<dyn std::error::Error>> {
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;
    assert!(health_check(&pool).await?, "Database health check failed");

    run_migrations(&pool).await?;
    // applying twice is a no-op
    run_migrations(&pool).await?;

    let row = sqlx::query(
        "SELECT COUNT(*) AS tables FROM information_schema.tables
         WHERE table_name IN ('employees', 'geofences', 'geofence_assignments',
                              'tracking_sessions', 'geofence_entries', 'polyline_points')",
    )
    .fetch_one(&pool)
    .await?;
    let tables: i64 = row.get("tables");
    assert_eq!(tables, 6, "tracking schema incomplete");

    let redis_pool = RedisPool::new(&RedisConfig::from_env())?;
    assert!(
        redis_pool.health_check().await?,
        "Redis health check failed"
    );

    let test_key = "integration_test:live";
    redis_pool.set(test_key, "17.452,78.3974", Some(10)).await?;
    assert_eq!(
        redis_pool.get(test_key).await?,
        Some("17.452,78.3974".to_string()),
        "Redis SET/GET test failed"
    );

    redis_pool.delete(test_key).await?;
    assert_eq!(redis_pool.get(test_key).await?, None, "Redis delete operation failed");

    Ok(())
}
