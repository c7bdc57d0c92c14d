use sqlx::PgConnection;

use crate::{
    db::common::{increment_promo_sql, insert_promo_sql, select_promo_sql, PROMO_COLUMNS},
    db_types::{NewPromoCode, PromoCode},
    traits::StoreError,
};

pub async fn fetch_promo_code(code: &str, conn: &mut PgConnection) -> Result<Option<PromoCode>, StoreError> {
    let promo = sqlx::query_as::<_, PromoCode>(&select_promo_sql()).bind(code).fetch_optional(conn).await?;
    Ok(promo)
}

pub async fn insert_promo_code(promo: &NewPromoCode, conn: &mut PgConnection) -> Result<PromoCode, StoreError> {
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

pub async fn lock_promo_code(code: &str, conn: &mut PgConnection) -> Result<Option<PromoCode>, StoreError> {
    let sql = format!("SELECT {PROMO_COLUMNS} FROM promo_codes WHERE code = $1 FOR UPDATE");
    let promo = sqlx::query_as::<_, PromoCode>(&sql).bind(code).fetch_optional(conn).await?;
    Ok(promo)
}

pub async fn increment_promo_usage(code: &str, conn: &mut PgConnection) -> Result<PromoCode, StoreError> {
    sqlx::query_as::<_, PromoCode>(&increment_promo_sql())
        .bind(code)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Promo code {code}")))
}
