use sqlx::SqliteConnection;

use crate::{
    db::common::{increment_promo_sql, insert_promo_sql, select_promo_sql},
    db_types::{NewPromoCode, PromoCode},
    traits::StoreError,
};

pub async fn fetch_promo_code(code: &str, conn: &mut SqliteConnection) -> Result<Option<PromoCode>, StoreError> {
    let promo = sqlx::query_as::<_, PromoCode>(&select_promo_sql()).bind(code).fetch_optional(conn).await?;
    Ok(promo)
}

pub async fn insert_promo_code(promo: &NewPromoCode, conn: &mut SqliteConnection) -> Result<PromoCode, StoreError> {
    let promo = sqlx::query_as::<_, PromoCode>(&insert_promo_sql())
        .bind(&promo.code)
        .bind(promo.discount_type.as_str())
        .bind(&promo.discount_value)
        .bind(&promo.currency)
        .bind(promo.expires_at)
        .bind(promo.max_uses)
        .bind(promo.active)
        .fetch_one(conn)
        .await?;
    Ok(promo)
}

pub async fn lock_promo_code(code: &str, conn: &mut SqliteConnection) -> Result<Option<PromoCode>, StoreError> {
    sqlx::query("UPDATE promo_codes SET code = code WHERE code = $1").bind(code).execute(&mut *conn).await?;
    fetch_promo_code(code, conn).await
}

pub async fn increment_promo_usage(code: &str, conn: &mut SqliteConnection) -> Result<PromoCode, StoreError> {
    sqlx::query_as::<_, PromoCode>(&increment_promo_sql())
        .bind(code)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Promo code {code}")))
}
