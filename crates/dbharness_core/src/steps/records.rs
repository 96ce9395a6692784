//! Steps over the baseline users, products and orders.

use super::{affected, execute, first, id_of, query, returned};
use crate::assertions::{assert_error, assert_field, assert_monotonic, assert_row_count};
use crate::context::ScenarioContext;
use crate::error::{ErrorKind, HarnessError, Result};
use crate::registry::{StepArgs, StepRegistry};
use crate::seeder::timestamp;
use crate::types::{Outcome, Row, RowSet, Value};

pub(super) fn register(registry: &mut StepRegistry) -> Result<()> {
    // Given
    registry.step("a user exists with username \"{username}\"", handler!(user_exists))?;
    registry.step("products exist in the inventory", handler!(products_exist))?;
    registry.step("a product exists with name \"{name}\"", handler!(product_exists))?;
    registry.step("orders exist for user \"{username}\"", handler!(orders_exist))?;

    // When
    registry.step(
        "I create a new user with username \"{username}\" and email \"{email}\"",
        handler!(create_user),
    )?;
    registry.step(
        "I try to create a user with duplicate username \"{username}\"",
        handler!(create_duplicate_user),
    )?;
    registry.step("I retrieve the user by username \"{username}\"", handler!(retrieve_user))?;
    registry.step("I update the user's email to \"{email}\"", handler!(update_email))?;
    registry.step("I delete the user", handler!(delete_user))?;
    registry.step("I check the inventory for \"{name}\"", handler!(check_inventory))?;
    registry.step(
        "I place an order for {quantity:d} units of \"{product}\"",
        handler!(place_order),
    )?;
    registry.step("I retrieve the order history", handler!(order_history))?;

    // Then
    registry.step("the user should be created successfully", handler!(user_created))?;
    registry.step("the user should be found", handler!(user_found))?;
    registry.step("the user's email should be \"{email}\"", handler!(user_email_is))?;
    registry.step("the user's email should be updated", handler!(email_updated))?;
    registry.step("the user should be deleted", handler!(user_deleted))?;
    registry.step("the user count should be {count:d}", handler!(user_count_is))?;
    registry.step(
        "the email of \"{username}\" should remain \"{email}\"",
        handler!(email_unchanged),
    )?;
    registry.step(
        "the operation should fail with a constraint violation",
        handler!(constraint_violation),
    )?;
    registry.step("the operation should fail with \"{kind}\"", handler!(fails_with_kind))?;
    registry.step("the error message should contain \"{text}\"", handler!(error_contains))?;
    registry.step("the product should be in stock", handler!(product_in_stock))?;
    registry.step("the stock count should be {count:d}", handler!(stock_count_is))?;
    registry.step("the order should be created successfully", handler!(order_created))?;
    registry.step("the order total should be {total:f}", handler!(order_total_is))?;
    registry.step(
        "the order history should contain {count:d} order",
        handler!(order_history_count),
    )?;
    registry.step(
        "the order history should contain {count:d} orders",
        handler!(order_history_count),
    )?;
    registry.step(
        "the order details should include the product name",
        handler!(order_details_include_product),
    )?;
    registry.step(
        "the orders should be sorted by date with the newest first",
        handler!(orders_newest_first),
    )?;
    Ok(())
}

async fn find_by(ctx: &mut ScenarioContext, table: &str, column: &str, value: &str) -> Result<RowSet> {
    let dialect = ctx.dialect();
    let sql = format!(
        "SELECT * FROM {} WHERE {} = {} ORDER BY id",
        dialect.quote(table),
        dialect.quote(column),
        dialect.placeholder(1)
    );
    query(ctx, table, &sql, &[Value::Text(value.to_string())]).await
}

async fn ensure_user(ctx: &mut ScenarioContext, username: &str) -> Result<RowSet> {
    let rows = find_by(ctx, "users", "username", username).await?;
    if !rows.is_empty() {
        return Ok(rows);
    }
    let row = Row::new()
        .with("username", username)
        .with("email", format!("{}@example.com", username))
        .with("created_at", timestamp())
        .with("is_active", 1);
    ctx.seeder.insert(&mut ctx.session, "users", &[row]).await?;
    find_by(ctx, "users", "username", username).await
}

fn user_id(ctx: &ScenarioContext) -> Result<i64> {
    id_of(first(ctx.rows("user")?, "user")?)
}

// ===== Given =====

async fn user_exists(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let rows = ensure_user(ctx, &args.text("username")?).await?;
    ctx.remember_rows("user", rows);
    Ok(())
}

async fn products_exist(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    if ctx.seeder.count(&mut ctx.session, "products").await? == 0 {
        return Err(HarnessError::NotFound {
            object: "products in the inventory".into(),
        });
    }
    Ok(())
}

async fn product_exists(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let name = args.text("name")?;
    let mut rows = find_by(ctx, "products", "name", &name).await?;
    if rows.is_empty() {
        let row = Row::new()
            .with("name", name.as_str())
            .with("price", 9.99)
            .with("category", "General")
            .with("in_stock", 10)
            .with("created_at", timestamp());
        ctx.seeder.insert(&mut ctx.session, "products", &[row]).await?;
        rows = find_by(ctx, "products", "name", &name).await?;
    }
    ctx.remember_rows("product", rows);
    Ok(())
}

async fn orders_exist(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let users = ensure_user(ctx, &args.text("username")?).await?;
    let user = id_of(first(&users, "user")?)?;
    ctx.remember_rows("user", users);

    let dialect = ctx.dialect();
    let sql = format!("SELECT COUNT(*) FROM orders WHERE user_id = {}", dialect.placeholder(1));
    let existing = query(ctx, "orders", &sql, &[Value::Int(user)]).await?;
    if existing.scalar().and_then(Value::as_i64).unwrap_or(0) > 0 {
        return Ok(());
    }
    let products = query(ctx, "products", "SELECT id, price FROM products ORDER BY id", &[]).await?;
    let product = first(&products, "product")?;
    let order = Row::new()
        .with("user_id", user)
        .with("product_id", id_of(product)?)
        .with("quantity", 1)
        .with("total_amount", product.get("price").cloned().unwrap_or(Value::Null))
        .with("order_date", timestamp())
        .with("status", "pending");
    ctx.seeder.insert(&mut ctx.session, "orders", &[order]).await?;
    Ok(())
}

// ===== When =====

async fn create_user(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let username = args.text("username")?;
    let row = Row::new()
        .with("username", username.as_str())
        .with("email", args.text("email")?)
        .with("created_at", timestamp())
        .with("is_active", 1);
    let result = ctx.seeder.insert(&mut ctx.session, "users", &[row]).await;
    ctx.remember("username", username);
    ctx.record(result.map(Outcome::Affected));
    Ok(())
}

async fn create_duplicate_user(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let username = args.text("username")?;
    let row = Row::new()
        .with("username", username.as_str())
        .with("email", format!("duplicate.{}@example.com", username))
        .with("created_at", timestamp())
        .with("is_active", 1);
    let result = ctx.seeder.insert(&mut ctx.session, "users", &[row]).await;
    ctx.record(result.map(Outcome::Affected));
    Ok(())
}

async fn retrieve_user(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let result = find_by(ctx, "users", "username", &args.text("username")?).await;
    if let Ok(rows) = &result {
        ctx.remember_rows("user", rows.clone());
    }
    ctx.record(result.map(Outcome::Rows));
    Ok(())
}

async fn update_email(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let user = first(ctx.rows("user")?, "user")?.clone();
    let id = id_of(&user)?;
    if let Some(email) = user.get("email") {
        ctx.remember("previous_email", email.clone());
    }
    let dialect = ctx.dialect();
    let sql = format!(
        "UPDATE users SET email = {} WHERE id = {}",
        dialect.placeholder(1),
        dialect.placeholder(2)
    );
    let result = execute(ctx, "users", &sql, &[Value::Text(args.text("email")?), Value::Int(id)]).await;
    ctx.record(result.map(Outcome::Affected));
    Ok(())
}

async fn delete_user(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let id = user_id(ctx)?;
    let dialect = ctx.dialect();
    let sql = format!("DELETE FROM users WHERE id = {}", dialect.placeholder(1));
    let result = execute(ctx, "users", &sql, &[Value::Int(id)]).await;
    ctx.record(result.map(Outcome::Affected));
    Ok(())
}

async fn check_inventory(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let result = find_by(ctx, "products", "name", &args.text("name")?).await;
    if let Ok(rows) = &result {
        ctx.remember_rows("product", rows.clone());
    }
    ctx.record(result.map(Outcome::Rows));
    Ok(())
}

async fn place_order(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let user = user_id(ctx)?;
    let quantity = args.int("quantity")?;
    let products = find_by(ctx, "products", "name", &args.text("product")?).await?;
    let product = first(&products, "product")?;
    let price = product
        .get("price")
        .and_then(Value::as_f64)
        .ok_or_else(|| HarnessError::DataTypeMismatch("product price is not numeric".into()))?;
    let total = (price * quantity as f64 * 100.0).round() / 100.0;
    let order = Row::new()
        .with("user_id", user)
        .with("product_id", id_of(product)?)
        .with("quantity", quantity)
        .with("total_amount", total)
        .with("order_date", timestamp())
        .with("status", "pending");

    let result = ctx.seeder.insert(&mut ctx.session, "orders", &[order]).await;
    if result.is_ok() {
        let dialect = ctx.dialect();
        let sql = format!(
            "SELECT * FROM orders WHERE user_id = {} ORDER BY id DESC",
            dialect.placeholder(1)
        );
        let mut rows = query(ctx, "orders", &sql, &[Value::Int(user)]).await?;
        rows.rows.truncate(1);
        ctx.remember_rows("order", rows);
    }
    ctx.record(result.map(Outcome::Affected));
    Ok(())
}

async fn order_history(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let user = user_id(ctx)?;
    let dialect = ctx.dialect();
    let sql = format!(
        "SELECT o.id, o.quantity, o.total_amount, o.order_date, o.status, p.name AS product_name \
         FROM orders o JOIN products p ON p.id = o.product_id \
         WHERE o.user_id = {} ORDER BY o.order_date DESC, o.id DESC",
        dialect.placeholder(1)
    );
    let result = query(ctx, "orders", &sql, &[Value::Int(user)]).await;
    if let Ok(rows) = &result {
        ctx.remember_rows("orders", rows.clone());
    }
    ctx.record(result.map(Outcome::Rows));
    Ok(())
}

// ===== Then =====

async fn user_created(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    assert_row_count("insert", 1, affected(&ctx.expect_success()?)?)?;
    let username = ctx
        .recall("username")?
        .as_str()
        .map(str::to_string)
        .unwrap_or_default();
    let rows = find_by(ctx, "users", "username", &username).await?;
    assert_row_count(&format!("users named {}", username), 1, rows.len() as u64)
}

async fn user_found(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let rows = returned(ctx.expect_success()?)?;
    if rows.is_empty() {
        return Err(HarnessError::mismatch("a matching user", "no rows"));
    }
    Ok(())
}

async fn user_email_is(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let id = user_id(ctx)?;
    let dialect = ctx.dialect();
    let sql = format!("SELECT * FROM users WHERE id = {}", dialect.placeholder(1));
    let rows = query(ctx, "users", &sql, &[Value::Int(id)]).await?;
    assert_field(first(&rows, "user")?, "email", &Value::Text(args.text("email")?))
}

async fn email_updated(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    assert_row_count("update", 1, affected(&ctx.expect_success()?)?)
}

async fn user_deleted(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    ctx.expect_success()?;
    let id = user_id(ctx)?;
    let dialect = ctx.dialect();
    let sql = format!("SELECT COUNT(*) FROM users WHERE id = {}", dialect.placeholder(1));
    let rows = query(ctx, "users", &sql, &[Value::Int(id)]).await?;
    let remaining = rows.scalar().and_then(Value::as_i64).unwrap_or(0);
    assert_row_count(&format!("users with id {}", id), 0, remaining as u64)
}

async fn user_count_is(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let count = ctx.seeder.count(&mut ctx.session, "users").await?;
    assert_row_count("users", args.count("count")? as u64, count as u64)
}

async fn email_unchanged(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let rows = find_by(ctx, "users", "username", &args.text("username")?).await?;
    assert_field(first(&rows, "user")?, "email", &Value::Text(args.text("email")?))
}

async fn constraint_violation(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let err = ctx.expect_failure()?;
    if err.kind().is_constraint_violation() {
        Ok(())
    } else {
        Err(HarnessError::mismatch(
            "a constraint violation",
            format!("{}: {}", err.kind(), err),
        ))
    }
}

async fn fails_with_kind(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let kind: ErrorKind = args.text("kind")?.parse()?;
    let outcome = ctx.inspect()?;
    assert_error(&outcome.result, kind, None)
}

async fn error_contains(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let outcome = ctx.inspect()?;
    let kind = match &outcome.result {
        Err(e) => e.kind(),
        Ok(value) => {
            return Err(HarnessError::mismatch(
                "a failed operation",
                format!("success ({:?})", value),
            ))
        }
    };
    assert_error(&outcome.result, kind, Some(args.text("text")?.as_str()))
}

async fn product_in_stock(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    ctx.expect_success()?;
    let product = first(ctx.rows("product")?, "product")?;
    match product.get("in_stock").and_then(Value::as_i64) {
        Some(n) if n > 0 => Ok(()),
        other => Err(HarnessError::mismatch(
            "in_stock > 0",
            format!("in_stock = {:?}", other),
        )),
    }
}

async fn stock_count_is(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let product = first(ctx.rows("product")?, "product")?;
    assert_field(product, "in_stock", &Value::Int(args.int("count")?))
}

async fn order_created(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    assert_row_count("order insert", 1, affected(&ctx.expect_success()?)?)
}

async fn order_total_is(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let order = first(ctx.rows("order")?, "order")?;
    assert_field(order, "total_amount", &Value::Float(args.float("total")?))
}

async fn order_history_count(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let rows = returned(ctx.expect_success()?)?;
    assert_row_count("order history", args.count("count")? as u64, rows.len() as u64)
}

async fn order_details_include_product(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let orders = ctx.rows("orders")?;
    for row in &orders.rows {
        match row.get("product_name") {
            Some(Value::Text(name)) if !name.is_empty() => {}
            other => {
                return Err(HarnessError::mismatch(
                    "a product name on every order",
                    format!("{:?}", other),
                ))
            }
        }
    }
    Ok(())
}

async fn orders_newest_first(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    assert_monotonic(ctx.rows("orders")?, "order_date", true)
}
