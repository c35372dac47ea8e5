use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use starsearch_ipc::transport::loopback::{HeldQuery, LoopbackPeer};
use starsearch_ipc::{
    ClientConfig, EverythingMt, FieldValue, IpcError, QueryRequest, ReplyBuilder, RequestField,
    RequestFlags, ResultSet,
};

const WAIT: Duration = Duration::from_secs(2);

fn reply_for(request: &QueryRequest) -> Vec<u8> {
    ReplyBuilder::new(RequestFlags::FILE_NAME)
        .row(vec![FieldValue::text(&request.search)])
        .build()
}

fn first_name(results: &ResultSet) -> String {
    results
        .get(0)
        .unwrap()
        .get_str(RequestField::FileName)
        .unwrap()
}

fn take_held(peer: &LoopbackPeer, count: usize) -> Vec<HeldQuery> {
    let mut held = Vec::new();
    for _ in 0..1000 {
        held.extend(peer.take_held());
        if held.len() >= count {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(held.len(), count, "peer did not receive every query");
    held
}

#[test]
fn test_concurrent_senders_get_their_own_results() {
    let peer = LoopbackPeer::new();
    peer.respond_with(|req| Some(reply_for(req)));
    let everything =
        Arc::new(EverythingMt::with_connector(peer.connector(), ClientConfig::default()).unwrap());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let everything = everything.clone();
            std::thread::spawn(move || {
                let search = format!("file-{}.txt", i);
                let results = everything
                    .query_send(&QueryRequest::new(search.clone()))
                    .wait_timeout(WAIT)
                    .unwrap();
                assert_eq!(first_name(&results), search);
                results.id()
            })
        })
        .collect();

    let ids: HashSet<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ids.len(), 16);
    assert_eq!(everything.pending_count(), 0);
}

#[test]
fn test_shuffled_replies_resolve_matching_futures() {
    let peer = LoopbackPeer::new();
    peer.hold_replies();
    let everything = EverythingMt::with_connector(peer.connector(), ClientConfig::default()).unwrap();

    let futures: Vec<_> = (0..8)
        .map(|i| {
            let search = format!("q{}", i);
            (search.clone(), everything.query_send(&QueryRequest::new(search)))
        })
        .collect();
    assert_eq!(everything.pending_count(), 8);

    let mut held = take_held(&peer, 8);
    let ids: HashSet<u32> = held.iter().map(|q| q.request.id).collect();
    assert_eq!(ids.len(), 8, "ids must be unique while pending");

    // 逆序、再奇偶交错
    held.reverse();
    let (even, odd): (Vec<_>, Vec<_>) = held.into_iter().enumerate().partition(|(i, _)| i % 2 == 0);
    for (_, query) in odd.into_iter().chain(even) {
        let data = reply_for(&query.request);
        query.reply(data);
    }

    for (search, fut) in futures {
        let results = fut.wait_timeout(WAIT).unwrap();
        assert_eq!(first_name(&results), search);
    }
    assert_eq!(everything.pending_count(), 0);
}

#[test]
fn test_duplicate_and_unknown_replies_are_dropped() {
    let peer = LoopbackPeer::new();
    peer.hold_replies();
    let everything = EverythingMt::with_connector(peer.connector(), ClientConfig::default()).unwrap();

    let first = everything.query_send(&QueryRequest::new("one"));
    let second = everything.query_send(&QueryRequest::new("two"));
    let mut held = take_held(&peer, 2);
    let two = held.pop().unwrap();
    let one = held.pop().unwrap();

    // 未知 id
    one.reply_with_id(u32::MAX - 3, reply_for(&two.request));
    let data = reply_for(&one.request);
    one.reply_with_id(one.request.id, data.clone());
    // 重复
    one.reply(data);

    assert_eq!(first_name(&first.wait_timeout(WAIT).unwrap()), "one");
    assert_eq!(everything.pending_count(), 1);

    let data = reply_for(&two.request);
    two.reply(data);
    assert_eq!(first_name(&second.wait_timeout(WAIT).unwrap()), "two");
    assert_eq!(everything.pending_count(), 0);
}

#[test]
fn test_request_id_is_replaced() {
    let peer = LoopbackPeer::new();
    peer.hold_replies();
    let everything = EverythingMt::with_connector(peer.connector(), ClientConfig::default()).unwrap();

    let _a = everything.query_send(&QueryRequest::new("a").id(5));
    let _b = everything.query_send(&QueryRequest::new("b").id(5));
    let held = take_held(&peer, 2);
    assert_ne!(held[0].request.id, held[1].request.id);
}

#[tokio::test]
async fn test_teardown_abandons_every_pending_query() {
    let peer = LoopbackPeer::new();
    peer.hold_replies();
    let everything = EverythingMt::with_connector(peer.connector(), ClientConfig::default()).unwrap();

    let futures: Vec<_> = (0..3)
        .map(|i| everything.query_send(&QueryRequest::new(format!("pending-{}", i))))
        .collect();
    drop(everything);

    for fut in futures {
        assert_eq!(fut.await.unwrap_err(), IpcError::Abandoned);
    }
}

#[tokio::test]
async fn test_query_without_peer_never_completes_until_teardown() {
    let peer = LoopbackPeer::absent();
    peer.respond_with(|req| Some(reply_for(req)));
    let everything = EverythingMt::with_connector(peer.connector(), ClientConfig::default()).unwrap();

    let fut = everything.query_send(&QueryRequest::new("lost"));
    assert_eq!(everything.pending_count(), 1);
    drop(everything);
    assert_eq!(fut.await.unwrap_err(), IpcError::Abandoned);
    assert!(peer.received().is_empty());
}
