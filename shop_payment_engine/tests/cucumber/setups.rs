use cucumber::given;
use shop_payment_engine::{db_types::NewPromoCode, PaymentStore};

use crate::cucumber::{
    shop_world::{OrderManagementSystem, CURRENCY},
    ShopWorld,
};

#[given("a fresh install")]
async fn fresh_database(world: &mut ShopWorld) {
    let system = OrderManagementSystem::new().await;
    world.system = Some(system);
}

#[given(expr = "a {int}% promo code {word}")]
async fn percentage_promo(world: &mut ShopWorld, percent: i64, code: String) {
    let promo = NewPromoCode::percentage(&code, percent.into(), CURRENCY);
    world.system().db.insert_promo_code(&promo).await.expect("Error inserting promo code");
}
