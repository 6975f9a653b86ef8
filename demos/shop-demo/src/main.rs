//! # Shop Demo
//!
//! A toy shop: purchases are commands, balance and inventory changes are
//! events, and every purchase can be taken back through the undo history.
//!
//! Run with `RUST_LOG=tandem_core=debug` to watch the invoker work.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tandem_core::{
    Command, CompositeCommand, EventBus, Invoker, Listener, ListenerRegistry, ObjectLookup,
    ObjectLookupExt, ObjectRegistry, SignalBus,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ============================================================================
// Domain objects
// ============================================================================

#[derive(Debug)]
struct Wallet {
    gold: Mutex<i64>,
}

#[derive(Debug, Default)]
struct Inventory {
    items: Mutex<Vec<String>>,
}

// ============================================================================
// Events
// ============================================================================

#[derive(Clone)]
struct ShopBuses {
    /// New balance after every change.
    gold_changed: EventBus<(i64,)>,
    /// Item name and the price paid (negative when returned).
    item_moved: EventBus<(String, i64)>,
    /// Fired once per completed order.
    order_closed: SignalBus,
}

impl ShopBuses {
    fn new() -> Self {
        Self {
            gold_changed: EventBus::named("gold-changed"),
            item_moved: EventBus::named("item-moved"),
            order_closed: SignalBus::named("order-closed"),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

struct Buy {
    name: String,
    item: String,
    price: i64,
    wallet: Uuid,
    inventory: Uuid,
    lookup: Arc<dyn ObjectLookup>,
    buses: ShopBuses,
}

impl Buy {
    fn resolve(&self) -> Result<(Arc<Wallet>, Arc<Inventory>)> {
        let wallet = self
            .lookup
            .get::<Wallet>(self.wallet)
            .context("wallet not found")?;
        let inventory = self
            .lookup
            .get::<Inventory>(self.inventory)
            .context("inventory not found")?;
        Ok((wallet, inventory))
    }
}

#[async_trait]
impl Command for Buy {
    async fn execute(&self) -> Result<()> {
        let (wallet, inventory) = self.resolve()?;

        let balance = {
            let mut gold = wallet.gold.lock();
            if *gold < self.price {
                anyhow::bail!("{} costs {} but only {} gold left", self.item, self.price, *gold);
            }
            *gold -= self.price;
            *gold
        };
        inventory.items.lock().push(self.item.clone());

        self.buses.gold_changed.raise_value(balance);
        self.buses.item_moved.raise((self.item.clone(), self.price));
        Ok(())
    }

    async fn undo(&self) -> Result<()> {
        let (wallet, inventory) = self.resolve()?;

        {
            let mut items = inventory.items.lock();
            let slot = items
                .iter()
                .rposition(|item| item == &self.item)
                .context("item already gone")?;
            items.remove(slot);
        }
        let balance = {
            let mut gold = wallet.gold.lock();
            *gold += self.price;
            *gold
        };

        self.buses.gold_changed.raise_value(balance);
        self.buses.item_moved.raise((self.item.clone(), -self.price));
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct Shop {
    lookup: Arc<dyn ObjectLookup>,
    wallet: Uuid,
    inventory: Uuid,
    buses: ShopBuses,
}

impl Shop {
    fn buy(&self, item: &str, price: i64) -> Buy {
        Buy {
            name: format!("buy:{item}"),
            item: item.to_string(),
            price,
            wallet: self.wallet,
            inventory: self.inventory,
            lookup: self.lookup.clone(),
            buses: self.buses.clone(),
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("shop_demo=info".parse()?))
        .init();

    let objects = ObjectRegistry::new();
    let wallet = objects.insert(Wallet {
        gold: Mutex::new(100),
    });
    let inventory = objects.insert(Inventory::default());

    let shop = Shop {
        lookup: Arc::new(objects.clone()),
        wallet,
        inventory,
        buses: ShopBuses::new(),
    };

    // Listeners, recorded so they could be re-attached after a reload.
    let bindings = ListenerRegistry::new();
    let hud = Listener::builder("hud")
        .on::<i64, _>(|gold| {
            info!(gold, "balance changed");
            Ok(())
        })
        .build();
    let ledger = Listener::builder("ledger")
        .on_pair::<String, i64, _>(|item, price| {
            info!(%item, price, "ledger entry");
            Ok(())
        })
        .build();
    let receipt = Listener::signal("receipt", || {
        info!("order closed");
        Ok(())
    });
    bindings.bind(&shop.buses.gold_changed, &hud);
    bindings.bind(&shop.buses.item_moved, &ledger);
    bindings.bind(&shop.buses.order_closed, &receipt);

    let invoker = Invoker::builder().name("shop").build();

    invoker.invoke(shop.buy("sword", 40)).await?;
    shop.buses.order_closed.signal();

    let order = CompositeCommand::new("order:potions")
        .with(shop.buy("red potion", 15))
        .with(shop.buy("blue potion", 15));
    invoker.invoke(order).await?;
    shop.buses.order_closed.signal();

    if let Err(fault) = invoker.invoke(shop.buy("castle", 10_000)).await {
        info!(%fault, "purchase refused");
    }

    info!(history = ?history(&invoker), "after shopping");

    invoker.undo_last().await;
    info!(history = ?history(&invoker), "returned the potions");

    let undone = invoker.undo_all().await;
    info!(undone, "returned everything");

    let wallet = objects.get::<Wallet>(wallet).context("wallet not found")?;
    let inventory = objects
        .get::<Inventory>(inventory)
        .context("inventory not found")?;
    info!(
        gold = *wallet.gold.lock(),
        items = inventory.items.lock().len(),
        "final state"
    );

    bindings.detach_all();
    Ok(())
}

fn history(invoker: &Invoker) -> Vec<String> {
    invoker
        .history()
        .iter()
        .map(|command| command.name().to_string())
        .collect()
}
