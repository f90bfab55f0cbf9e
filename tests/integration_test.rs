use std::sync::Arc;

use serde_json::json;

use classifieds::config::EngineConfig;
use classifieds::scoring::{ScoreAggregator, ScoreEvent};
use classifieds::search::SearchRequest;
use classifieds::service::{Actor, CategoryRef, ClassifiedsService, CreateAdvertisement};
use classifieds::store::sqlite::SqliteClassifiedsStore;
use classifieds::store::{ClassifiedsStore, CreateCategory};
use classifieds::ClassifiedsError;

async fn setup(config: EngineConfig) -> (ClassifiedsService, Arc<SqliteClassifiedsStore>) {
    let store = Arc::new(
        SqliteClassifiedsStore::in_memory(ScoreAggregator::new(&config))
            .await
            .expect("Failed to create in-memory store"),
    );
    let service = ClassifiedsService::new(store.clone(), &config);
    (service, store)
}

async fn publish(
    service: &ClassifiedsService,
    seller: &str,
    title: &str,
    category: CategoryRef,
) -> String {
    let ad = service
        .create_advertisement(
            &Actor::user(seller),
            CreateAdvertisement {
                title: title.to_string(),
                description: None,
                price_cents: 1_000,
                category,
            },
        )
        .await
        .expect("Failed to create advertisement");
    service
        .approve_advertisement(&Actor::staff("moderator"), &ad.id, true)
        .await
        .expect("Failed to approve advertisement");
    ad.id
}

fn new_category(name: &str) -> CategoryRef {
    CategoryRef::New(CreateCategory {
        name: name.to_string(),
        description: None,
    })
}

#[tokio::test]
async fn test_electric_query_ranks_vehicles_first() {
    let (service, _) = setup(EngineConfig::default()).await;
    for name in ["Electronics", "Electric Vehicles", "Furniture"] {
        let input = CreateCategory {
            name: name.to_string(),
            description: None,
        };
        service.create_category(&Actor::user("u"), input).await.unwrap();
    }

    let request: SearchRequest = serde_json::from_value(json!({ "query": "  ELECTRIC " })).unwrap();
    let page = service.search_categories(&request).await.unwrap();

    let names: Vec<&str> = page.items.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["electric vehicles", "electronics"]);
    assert_eq!(page.query.as_deref(), Some("electric"));
}

#[tokio::test]
async fn test_unmatched_query_reports_not_found() {
    let (service, _) = setup(EngineConfig::default()).await;
    publish(&service, "seller", "Oak dining table", new_category("furniture")).await;

    let err = service
        .search_advertisements(&SearchRequest::new("saxophone"))
        .await
        .unwrap_err();
    match err {
        ClassifiedsError::NotFound { message } => assert!(message.contains("saxophone")),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_pages_cover_every_match_once() {
    let (service, _) = setup(EngineConfig { page_size: 4, ..EngineConfig::default() }).await;
    let input = CreateCategory {
        name: "chairs".to_string(),
        description: None,
    };
    let category_id = service.create_category(&Actor::user("u"), input).await.unwrap().id;
    for i in 0..10 {
        publish(
            &service,
            "seller",
            &format!("Garden chair set {}", i),
            CategoryRef::Existing(category_id.clone()),
        )
        .await;
    }

    let mut seen = Vec::new();
    for page in 1..=3 {
        let result = service
            .search_advertisements(&SearchRequest::new("garden chair").with_page(page))
            .await
            .unwrap();
        assert_eq!(result.total, 10);
        seen.extend(result.items.into_iter().map(|ad| ad.id));
    }
    assert_eq!(seen.len(), 10);
    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 10);

    let past_end = service
        .search_advertisements(&SearchRequest::new("garden chair").with_page(4))
        .await
        .unwrap();
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn test_browse_returns_newest_active_first() {
    let (service, _) = setup(EngineConfig::default()).await;
    let first = publish(&service, "seller", "First", new_category("misc")).await;
    let second = publish(&service, "seller", "Second", CategoryRef::Existing(
        service.get_category(None, Some("misc")).await.unwrap().id,
    ))
    .await;

    let page = service.search_advertisements(&SearchRequest::default()).await.unwrap();
    let ids: Vec<&str> = page.items.iter().map(|ad| ad.id.as_str()).collect();
    assert_eq!(ids, vec![second.as_str(), first.as_str()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_likes_are_not_lost() {
    const LIKES: i64 = 32;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("classifieds.db").display());
    let config = EngineConfig {
        like_weight: 2,
        ..EngineConfig::default()
    };
    let store = Arc::new(
        SqliteClassifiedsStore::new(&url, ScoreAggregator::new(&config))
            .await
            .expect("Failed to open file-backed store"),
    );
    let service = Arc::new(ClassifiedsService::new(store.clone(), &config));
    let ad_id = publish(&service, "seller", "Road bike", new_category("bikes")).await;

    let handles: Vec<_> = (0..LIKES)
        .map(|i| {
            let service = service.clone();
            let ad_id = ad_id.clone();
            tokio::spawn(async move {
                service
                    .like_advertisement(&Actor::user(format!("buyer-{}", i)), &ad_id)
                    .await
            })
        })
        .collect();

    let mut failures = Vec::new();
    for handle in handles {
        if let Err(e) = handle.await.expect("like task panicked") {
            failures.push(e);
        }
    }
    assert!(failures.is_empty(), "likes failed: {:?}", failures);

    let score = store.get_advertisement(&ad_id).await.unwrap().score;
    assert_eq!(score, LIKES * config.like_weight);
}

#[tokio::test]
async fn test_comment_add_add_remove_nets_one() {
    let (service, store) = setup(EngineConfig::default()).await;
    let ad_id = publish(&service, "seller", "Road bike", new_category("bikes")).await;
    let buyer = Actor::user("buyer");

    service.add_comment(&buyer, &ad_id, "Hi").await.unwrap();
    let second = service.add_comment(&buyer, &ad_id, "Hello?").await.unwrap();
    service.delete_comment(&buyer, &second.id).await.unwrap();

    assert_eq!(store.get_advertisement(&ad_id).await.unwrap().score, 1);
}

#[tokio::test]
async fn test_configured_weights_apply() {
    let config = EngineConfig {
        like_weight: 5,
        save_weight: 3,
        ..EngineConfig::default()
    };
    let (service, store) = setup(config).await;
    let ad_id = publish(&service, "seller", "Camera", new_category("photo")).await;
    let buyer = Actor::user("buyer");

    service.like_advertisement(&buyer, &ad_id).await.unwrap();
    service.save_advertisement(&buyer, &ad_id).await.unwrap();

    assert_eq!(store.get_advertisement(&ad_id).await.unwrap().score, 8);
}

#[test]
fn test_score_events_serialize_with_kind_tag() {
    let event = ScoreEvent::LikeAdded {
        advertisement_id: "ad-1".to_string(),
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value, json!({ "kind": "like_added", "advertisement_id": "ad-1" }));
}

#[tokio::test]
async fn test_deleting_category_removes_its_ads() {
    let (service, store) = setup(EngineConfig::default()).await;
    let ad_id = publish(&service, "seller", "Kayak", new_category("boats")).await;
    let category = service.get_category(None, Some("boats")).await.unwrap();

    let err = service.delete_category(&Actor::user("seller"), &category.id).await.unwrap_err();
    assert!(matches!(err, ClassifiedsError::Unauthorized { .. }));

    service.delete_category(&Actor::staff("moderator"), &category.id).await.unwrap();
    assert!(matches!(
        store.get_advertisement(&ad_id).await.unwrap_err(),
        ClassifiedsError::NotFound { .. }
    ));
}
