use log::info;

use crate::database::AppState;
use crate::error::ServiceResult;
use crate::models::{Cents, Product, User};

pub const DEMO_NFC_UID: &str = "04A1B2";

async fn add_user(
    app_state: &AppState,
    name: &str,
    phone: &str,
    preferred_payment_method_id: Option<u64>,
) -> ServiceResult<User> {
    let user = app_state
        .identities
        .create_user(name, phone, preferred_payment_method_id)
        .await?;
    let token = app_state.tokens.mint(user.id);
    info!("Demo user '{}' (id {}) token: {}", user.name, user.id, token);
    Ok(user)
}

async fn add_product(app_state: &AppState, name: &str, cents: i64) -> ServiceResult<Product> {
    app_state.ledger.insert_product(name, Cents(cents)).await
}

/// Seed products, two users and a filled cart for the user with the demo card
pub async fn load_demo_data(app_state: &AppState) -> ServiceResult<()> {
    let tomatoes = add_product(app_state, "Fresh Tomatoes", 1125).await?;
    let potatoes = add_product(app_state, "Organic Potatoes", 1312).await?;
    let apples = add_product(app_state, "Red Apples", 1875).await?;
    let bananas = add_product(app_state, "Fresh Bananas", 950).await?;
    let milk = add_product(app_state, "Fresh Milk", 1599).await?;
    let bread = add_product(app_state, "Fresh Bread", 750).await?;

    let sara = add_user(app_state, "Sara Ahmed", "0500000001", Some(2)).await?;
    let omar = add_user(app_state, "Omar Khalid", "0500000002", None).await?;

    app_state.identities.link(sara.id, DEMO_NFC_UID).await?;

    let ledger = &app_state.ledger;
    ledger.put_cart_item(sara.id, apples.id, 1).await?;
    ledger.put_cart_item(sara.id, bread.id, 1).await?;
    ledger.put_cart_item(sara.id, milk.id, 2).await?;
    ledger.put_cart_item(omar.id, tomatoes.id, 2).await?;
    ledger.put_cart_item(omar.id, potatoes.id, 1).await?;
    ledger.put_cart_item(omar.id, bananas.id, 3).await?;

    info!(
        "Loaded demo data, nfc card {} belongs to user {}",
        DEMO_NFC_UID, sara.id
    );
    Ok(())
}
