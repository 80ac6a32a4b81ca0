use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use payflow::notification::{
    InboundFrame, NotificationCache, NotificationError, RealtimeNotificationManager,
    SocketConnection, SocketTransport,
};
use payflow::reconnect::{BackoffPolicy, DisconnectReason};
use payflow::{ConnectionState, SubjectId};

struct Server {
    to_client: mpsc::UnboundedSender<Result<InboundFrame, NotificationError>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl Server {
    fn send(&self, text: &str) {
        let _ = self
            .to_client
            .unbounded_send(Ok(InboundFrame::Text(text.to_string())));
    }

    fn drop_connection(&self) {
        let _ = self
            .to_client
            .unbounded_send(Ok(InboundFrame::Closed { clean: false }));
    }
}

fn pair() -> (Server, SocketConnection) {
    let (to_client, inbound) = mpsc::unbounded();
    let (outbound, from_client) = mpsc::unbounded::<String>();
    let sink = outbound.sink_map_err(|e| NotificationError::Send(e.to_string()));
    (
        Server {
            to_client,
            from_client,
        },
        SocketConnection {
            sink: Box::pin(sink),
            stream: inbound.boxed(),
        },
    )
}

#[derive(Default)]
struct QueuedTransport {
    queue: Mutex<VecDeque<SocketConnection>>,
}

#[async_trait]
impl SocketTransport for QueuedTransport {
    async fn connect(&self, _subject: &SubjectId) -> Result<SocketConnection, NotificationError> {
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| NotificationError::Connect("refused".into()))
    }
}

fn item(id: &str, subject: &str) -> String {
    format!(
        r#"{{"type":"new_item","data":{{"id":"{}","subjectId":"{}","title":"t","createdAt":"2024-05-01T10:00:00Z"}}}}"#,
        id, subject
    )
}

#[tokio::test(start_paused = true)]
async fn qa_unread_counter_never_goes_negative() {
    let (server, conn) = pair();
    let transport = Arc::new(QueuedTransport::default());
    transport.queue.lock().unwrap().push_back(conn);

    let manager = RealtimeNotificationManager::with_cache(
        transport,
        BackoffPolicy::notification_default(),
        NotificationCache::new(2),
    );
    let mut cache = manager.cache();
    manager.connect(SubjectId::new("u1")).unwrap();

    server.send(&item("n1", "course-1"));
    server.send(&item("n2", "course-2"));
    server.send(&item("n3", "course-3"));
    server.send(&item("n3", "course-3"));
    cache.wait_for(|c| c.unread() == 3).await.unwrap();
    assert_eq!(cache.borrow().len(), 2, "capacity bounds the item list");

    server.send(r#"{"type":"item_read","data":{"id":"n1"}}"#);
    server.send(r#"{"type":"item_read","data":{"id":"ghost-1"}}"#);
    server.send(r#"{"type":"item_read","data":{"id":"ghost-2"}}"#);
    server.send(r#"{"type":"item_read","data":{"id":"ghost-3"}}"#);
    cache.wait_for(|c| c.unread() == 0).await.unwrap();

    server.send(r#"{"type":"count_sync","data":{"unread":7}}"#);
    cache.wait_for(|c| c.unread() == 7).await.unwrap();

    manager.disconnect().await;
    assert_eq!(
        *manager.state().borrow(),
        ConnectionState::Disconnected(DisconnectReason::Shutdown)
    );
}

#[tokio::test(start_paused = true)]
async fn qa_mark_read_while_reconnecting_is_delivered() {
    let (first, conn1) = pair();
    let (mut second, conn2) = pair();
    let transport = Arc::new(QueuedTransport::default());
    transport.queue.lock().unwrap().extend([conn1, conn2]);

    let manager = RealtimeNotificationManager::new(transport, BackoffPolicy::notification_default());
    let mut state = manager.state();
    manager.connect(SubjectId::new("u1")).unwrap();
    state.wait_for(|s| s.is_connected()).await.unwrap();

    first.drop_connection();
    state
        .wait_for(|s| matches!(s, ConnectionState::Backoff { .. }))
        .await
        .unwrap();

    manager.mark_read(SubjectId::new("course-9"));
    assert_eq!(manager.pending_commands(), 1);

    let delivered = tokio::time::timeout(Duration::from_secs(5), second.from_client.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered, r#"{"type":"mark_read","subjectId":"course-9"}"#);
    assert_eq!(manager.pending_commands(), 0);
    assert!(manager.state().borrow().is_connected());

    manager.disconnect().await;
}
