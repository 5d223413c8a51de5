use super::*;

#[tokio::test]
async fn test_duplicate_save_keeps_first() {
    let store = MockMessageStore::new();
    let message = Message::new("user-1", "hello");
    store.save(&message).await.unwrap();

    let mut again = message.clone();
    again.content = "changed".to_string();
    store.save(&again).await.unwrap();

    assert_eq!(store.list_all().await.unwrap(), vec![message]);
    assert_eq!(store.save_calls().await, 2);
}

#[tokio::test]
async fn test_fail_on_save_stores_nothing() {
    let store = MockMessageStore::new();
    store.set_fail_on_save(true).await;

    assert!(store.save(&Message::new("user-1", "x")).await.is_err());
    store.set_fail_on_save(false).await;
    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_is_oldest_first() {
    let store = MockMessageStore::new();
    let mut late = Message::new("user-1", "late");
    let early = Message::new("user-2", "early");
    late.created_at = early.created_at + chrono::Duration::seconds(1);

    store.save(&late).await.unwrap();
    store.save(&early).await.unwrap();

    assert_eq!(store.list_all().await.unwrap(), vec![early, late]);
}
