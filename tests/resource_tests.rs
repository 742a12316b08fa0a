//! Async resources bound to stores

use larder::{
    define_store, AsyncResource, FetchContext, MemberRef, Members, Registry, RegistryConfig, ResourceOptions,
    ResourceStatus, UseStore,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

fn products_store(name: &str, calls: Arc<AtomicUsize>) -> UseStore {
    define_store(name, move |kit| {
        let calls = Arc::clone(&calls);
        let products = kit.resource(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(vec!["tea".to_string(), "rice".to_string()])
            }
        });
        Ok(Members::new().with("products", products))
    })
}

#[tokio::test]
async fn fetcher_runs_once_for_every_consumer() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = products_store("products", Arc::clone(&calls));
    let registry = Registry::new(RegistryConfig::default());

    let first = store.resource_in::<Vec<String>, ()>(&registry, "products").unwrap();
    let second = store.resource_in::<Vec<String>, ()>(&registry, "products").unwrap();
    assert_eq!(first.snapshot.status, ResourceStatus::Fetching);

    let (a, b) = tokio::join!(first.ready(), second.ready());
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(first.resource.data().map(|p| p.len()), Some(2));
    assert_eq!(second.resource.status(), ResourceStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn manual_resources_wait_for_execute() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = define_store("search", {
        let calls = Arc::clone(&calls);
        move |kit| {
            let calls = Arc::clone(&calls);
            let results = kit.resource_with(
                move |ctx: FetchContext<String>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(format!("results for {}", ctx.param.unwrap_or_default())) }
                },
                ResourceOptions::new().manual(),
            )?;
            Ok(Members::new().with("results", results))
        }
    });
    let registry = Registry::new(RegistryConfig::default());

    let results = store.get_in(&registry).unwrap().resource::<String, String>("results").unwrap();
    assert_eq!(results.status(), ResourceStatus::Idle);
    registry.prefetch().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    results.execute_with("oolong".to_string()).await.unwrap();
    assert_eq!(results.data().as_deref(), Some("results for oolong"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_resources_do_not_fetch_on_the_server() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = define_store("profile", {
        let calls = Arc::clone(&calls);
        move |kit| {
            let calls = Arc::clone(&calls);
            let profile = kit.resource_with::<_, (), _, _>(
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok("ada".to_string()) }
                },
                ResourceOptions::new().client(),
            )?;
            Ok(Members::new().with("profile", profile))
        }
    });

    let server = Registry::new(RegistryConfig::new().server());
    let profile = store.get_in(&server).unwrap().resource::<String, ()>("profile").unwrap();
    assert_eq!(profile.status(), ResourceStatus::Fetching);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let client = Registry::new(RegistryConfig::default());
    client.hydrate_json(&server.to_json().unwrap()).unwrap();
    let profile = store.get_in(&client).unwrap().resource::<String, ()>("profile").unwrap();
    profile.suspense().await.unwrap();
    assert_eq!(profile.data().as_deref(), Some("ada"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn prefetch_settles_every_auto_resource() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = products_store("catalog", Arc::clone(&calls));
    let server = Registry::new(RegistryConfig::new().server());

    store.get_in(&server).unwrap();
    server.prefetch().await.unwrap();

    let tree = server.snapshot().unwrap();
    assert_eq!(tree["catalog"]["products"]["status"], "success");
    assert_eq!(tree["catalog"]["products"]["data"][0], "tea");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_fetch_is_state_until_awaited() {
    let store = define_store("flaky", |kit| {
        let stock = kit.resource(|_| async { Err::<u32, _>(anyhow::anyhow!("warehouse offline")) });
        Ok(Members::new().with("stock", stock))
    });
    let registry = Registry::new(RegistryConfig::default());

    let MemberRef::Resource(stock) = store.member_in(&registry, "stock").unwrap() else {
        panic!("stock is a resource");
    };
    let err = stock.suspense().await.unwrap_err();
    assert_eq!(err.message, "warehouse offline");
    assert_eq!(stock.status(), ResourceStatus::Error);
    assert_eq!(stock.snapshot_json().unwrap()["error"]["message"], "warehouse offline");
    assert!(registry.prefetch().await.is_err());
}

#[tokio::test]
async fn newest_refresh_wins_inside_a_store() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = define_store("race", {
        let calls = Arc::clone(&calls);
        move |kit| {
            let calls = Arc::clone(&calls);
            let value = kit.resource_with::<_, (), _, _>(
                move |_| {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        let delay = if call == 0 { 50 } else { 10 };
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        Ok(call)
                    }
                },
                ResourceOptions::new().manual(),
            )?;
            Ok(Members::new().with("value", value))
        }
    });
    let registry = Registry::new(RegistryConfig::default());
    let value = store.get_in(&registry).unwrap().resource::<usize, ()>("value").unwrap();

    let slow = value.refresh();
    let fast = value.refresh();
    fast.await.unwrap();
    slow.await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(value.data(), Some(1));
    assert_eq!(value.status(), ResourceStatus::Success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn settles_from_worker_threads() {
    let resource = AsyncResource::new(|_| async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(42u64)
    });
    let seen = Arc::new(AtomicUsize::new(0));
    let _subscription = resource.on_success({
        let seen = Arc::clone(&seen);
        move |value| {
            seen.store(value as usize, Ordering::SeqCst);
        }
    });

    resource.start().await.unwrap();
    assert_eq!(resource.data(), Some(42));
    assert_eq!(seen.load(Ordering::SeqCst), 42);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_first_access_assembles_once() {
    let handle = tokio::runtime::Handle::current();

    for _ in 0..100 {
        let runs = Arc::new(AtomicUsize::new(0));
        let fetches = Arc::new(AtomicUsize::new(0));
        let store = define_store("contended", {
            let runs = Arc::clone(&runs);
            let fetches = Arc::clone(&fetches);
            move |kit| {
                runs.fetch_add(1, Ordering::SeqCst);
                let fetches = Arc::clone(&fetches);
                let stock = kit.resource(move |_| {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    async { Ok(1u32) }
                });
                Ok(Members::new().with("stock", stock))
            }
        });
        let registry = Registry::new(RegistryConfig::default());
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let threads: Vec<_> = (0..2)
            .map(|_| {
                let (store, registry, barrier, handle) =
                    (store.clone(), Arc::clone(&registry), Arc::clone(&barrier), handle.clone());
                std::thread::spawn(move || {
                    let _runtime = handle.enter();
                    barrier.wait();
                    store.get_in(&registry).unwrap()
                })
            })
            .collect();
        let stores: Vec<_> = threads.into_iter().map(|thread| thread.join().unwrap()).collect();

        assert!(Arc::ptr_eq(&stores[0], &stores[1]));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn factory_may_read_another_store() {
    let registry = Registry::new(RegistryConfig::default());
    let prices = define_store("prices", |kit| Ok(Members::new().with("tea", kit.state(850u32))));
    let cart = define_store("cart", {
        let prices = prices.clone();
        move |kit| {
            let tea = prices.get_in(kit.registry())?.state::<u32>("tea")?;
            Ok(Members::new().with("total", kit.state(tea.get() * 2)))
        }
    });

    let total = cart.get_in(&registry).unwrap().state::<u32>("total").unwrap();
    assert_eq!(total.get(), 1700);
    assert!(registry.store("prices").is_some());
}

#[tokio::test]
async fn panicking_fetch_fails_prefetch() {
    let store = define_store("explosive", |kit| {
        let stock: AsyncResource<u32> = kit.resource(|_| async { panic!("warehouse fire") });
        Ok(Members::new().with("stock", stock))
    });
    let registry = Registry::new(RegistryConfig::default());
    store.get_in(&registry).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(1), registry.prefetch()).await;
    let err = outcome.expect("prefetch settles").unwrap_err();
    assert_eq!(err.message, "fetcher panicked: warehouse fire");
}

#[test]
fn wrong_parameter_type_names_the_resource_type() {
    let store = define_store("typed-resource", |kit| {
        let lookup = kit.resource_with(
            |ctx: FetchContext<u32>| async move { Ok(ctx.param.unwrap_or_default()) },
            ResourceOptions::new().manual(),
        )?;
        Ok(Members::new().with("lookup", lookup))
    });
    let registry = Registry::new(RegistryConfig::default());

    let MemberRef::Resource(lookup) = store.member_in(&registry, "lookup").unwrap() else {
        panic!("lookup is a resource");
    };
    assert!(lookup.typed::<u32, u32>().is_ok());
    match lookup.typed::<u32, String>() {
        Err(larder::StoreError::TypeMismatch { expected, .. }) => {
            assert!(expected.contains("AsyncResource"));
            assert!(expected.contains("String"));
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("the parameter type differs"),
    }
}
