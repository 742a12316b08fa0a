//! Product catalog rendered on a "server" registry and hydrated on a "client"

use larder::{define_store, Action, FetchContext, Members, Registry, RegistryConfig, ResourceOptions, UseStore};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Product {
    id: u32,
    name: String,
    price_cents: u32,
}

async fn fetch_products() -> anyhow::Result<Vec<Product>> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(vec![
        Product { id: 1, name: "Sencha".into(), price_cents: 850 },
        Product { id: 2, name: "Oolong".into(), price_cents: 1200 },
        Product { id: 3, name: "Genmaicha".into(), price_cents: 700 },
    ])
}

fn catalog() -> UseStore {
    define_store("catalog", |kit| {
        let query = kit.state(String::new());
        let products = kit.resource(|_| fetch_products());
        let detail = kit.resource_with(
            |ctx: FetchContext<u32>| async move {
                let id: u32 = ctx.param.unwrap_or_default();
                let products = fetch_products().await?;
                products
                    .into_iter()
                    .find(|product| product.id == id)
                    .ok_or_else(|| anyhow::anyhow!("no product with id {id}"))
            },
            ResourceOptions::new().manual(),
        )?;
        let visible = kit.derived({
            let query = query.clone();
            let products = products.clone();
            move || {
                let query = query.get().to_lowercase();
                products
                    .data()
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|product| product.name.to_lowercase().contains(&query))
                    .map(|product| product.name)
                    .collect::<Vec<_>>()
            }
        });

        Ok(Members::new()
            .with("query", query.clone())
            .with("products", products)
            .with("detail", detail)
            .with("visible", visible)
            .with("search", Action::new(move |text: String| query.set(text))))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();
    println!("=== Product Catalog Example ===\n");

    let catalog = catalog();

    println!("1. Rendering on the server");
    let server = Registry::new(RegistryConfig::new().server());
    let store = catalog.get_in(&server)?;
    store.action("search")?.call::<String, ()>("cha".into())?;
    server.prefetch().await?;
    println!("   visible = {:?}", store.derived::<Vec<String>>("visible")?.get());

    let payload = server.to_json()?;
    println!("   payload = {payload}\n");

    println!("2. Hydrating the client");
    let client = Registry::new(RegistryConfig::default());
    client.hydrate_json(&payload)?;
    let store = catalog.get_in(&client)?;
    let products = store.resource::<Vec<Product>, ()>("products")?;
    println!("   products status = {}", products.status());
    println!("   query = {:?}", store.state::<String>("query")?.get());
    println!("   visible = {:?}\n", store.derived::<Vec<String>>("visible")?.get());

    println!("3. Fetching a detail on demand");
    let detail = store.resource::<Product, u32>("detail")?;
    let _subscription = detail.on_success(|product| {
        println!("   -> loaded {} for {} cents", product.name, product.price_cents);
    });
    detail.execute_with(2).await?;
    if let Err(err) = detail.execute_with(9).await {
        println!("   -> {err}");
    }
    println!("   detail snapshot = {}", serde_json::to_string(&detail.snapshot())?);

    println!("\n✓ Example complete!");
    Ok(())
}
