use super::Completion;
use crate::transport::message::{Message, MessageType};
use crate::utils::error::ChannelError;
use std::thread;
use std::time::Duration;

#[test]
fn test_completion_starts_pending() {
    let completion = Completion::new();
    assert!(!completion.is_done());
    assert!(completion.outcome().is_none());
    assert!(completion.wait_timeout(Duration::from_millis(10)).is_none());
}

#[test]
fn test_completion_completes_exactly_once() {
    let completion = Completion::new();
    assert!(completion.succeed(Some(Message::pub_ack(7))));
    assert!(!completion.fail(ChannelError::Closed));
    assert!(!completion.cancel());

    let ack = completion.wait().unwrap().unwrap();
    assert_eq!(ack.kind, MessageType::PubAck);
    assert_eq!(ack.message_id, Some(7));
}

#[test]
fn test_all_clones_observe_same_outcome() {
    let completion = Completion::new();
    let other = completion.clone();
    completion.fail(ChannelError::Timeout(100));

    assert!(matches!(other.outcome(), Some(Err(ChannelError::Timeout(100)))));
    assert!(matches!(completion.wait(), Err(ChannelError::Timeout(100))));
}

#[test]
fn test_wait_wakes_blocked_thread() {
    let completion = Completion::new();
    let waiter = {
        let completion = completion.clone();
        thread::spawn(move || completion.wait())
    };

    thread::sleep(Duration::from_millis(20));
    completion.succeed(None);

    let outcome = waiter.join().expect("waiter panicked");
    assert!(matches!(outcome, Ok(None)));
}

#[test]
fn test_racing_completions_only_one_wins() {
    let completion = Completion::new();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let completion = completion.clone();
            thread::spawn(move || {
                if i % 2 == 0 {
                    completion.succeed(None)
                } else {
                    completion.cancel()
                }
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    assert!(completion.is_done());
}

#[tokio::test]
async fn test_completion_can_be_awaited() {
    let completion = Completion::new();
    let remote = completion.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        remote.cancel();
    });

    let outcome = completion.await;
    assert!(matches!(outcome, Err(ChannelError::Cancelled)));
}

#[test]
fn test_completed_handle_is_ready_immediately() {
    let completion = Completion::new();
    completion.succeed(None);
    let outcome = futures::executor::block_on(completion);
    assert!(matches!(outcome, Ok(None)));
}

#[test]
fn test_wait_timeout_accepts_unbounded_timeout() {
    let completion = Completion::new();
    let other = completion.clone();
    let waiter = thread::spawn(move || other.wait_timeout(Duration::MAX));
    thread::sleep(Duration::from_millis(20));
    completion.fail(ChannelError::Closed);
    assert!(matches!(waiter.join().unwrap(), Some(Err(ChannelError::Closed))));
}
