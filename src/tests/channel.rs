use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::buffer::Buffer;
use crate::channel::{Channel, TryPop};
use crate::dims::Dims;

fn tagged(tag: usize) -> Buffer {
    Buffer::new(Dims::One(tag))
}

fn tag_of(buf: &Buffer) -> usize {
    buf.len()
}

#[test]
fn fifo_order() {
    let chan = Channel::new(8);
    for i in 1..=5 {
        chan.push(tagged(i)).unwrap();
    }
    for i in 1..=5 {
        assert_eq!(tag_of(&chan.pop().unwrap()), i);
    }
}

#[test]
fn pop_blocks_until_push() {
    let chan = Arc::new(Channel::new(2));
    let producer = {
        let chan = chan.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            chan.push(tagged(7)).unwrap();
        })
    };
    assert_eq!(tag_of(&chan.pop().unwrap()), 7);
    producer.join().unwrap();
}

#[test]
fn push_blocks_until_pop() {
    let chan = Arc::new(Channel::new(1));
    chan.push(tagged(1)).unwrap();
    let producer = {
        let chan = chan.clone();
        thread::spawn(move || {
            // Fills the single slot; must wait for the consumer.
            chan.push(tagged(2)).unwrap();
        })
    };
    thread::sleep(Duration::from_millis(20));
    assert_eq!(tag_of(&chan.pop().unwrap()), 1);
    assert_eq!(tag_of(&chan.pop().unwrap()), 2);
    producer.join().unwrap();
}

#[test]
fn close_drains_then_signals() {
    let chan = Channel::new(4);
    chan.push(tagged(1)).unwrap();
    chan.push(tagged(2)).unwrap();
    chan.close();

    assert_eq!(tag_of(&chan.pop().unwrap()), 1);
    assert_eq!(tag_of(&chan.pop().unwrap()), 2);
    assert!(chan.pop().is_none());
}

#[test]
fn push_after_close_returns_buffer() {
    let chan = Channel::new(2);
    chan.close();
    let rejected = chan.push(tagged(9)).unwrap_err();
    assert_eq!(tag_of(&rejected.0), 9);
}

#[test]
fn close_is_idempotent() {
    let chan = Channel::new(4);
    chan.push(tagged(3)).unwrap();
    chan.close();
    chan.close();
    chan.close();
    assert_eq!(tag_of(&chan.pop().unwrap()), 3);
    assert!(chan.pop().is_none());
}

#[test]
fn close_wakes_blocked_pusher() {
    let chan = Arc::new(Channel::new(1));
    chan.push(tagged(1)).unwrap();
    let producer = {
        let chan = chan.clone();
        thread::spawn(move || chan.push(tagged(2)))
    };
    thread::sleep(Duration::from_millis(20));
    chan.close();
    let result = producer.join().unwrap();
    assert_eq!(tag_of(&result.unwrap_err().0), 2);
    // The item queued before the close is still there.
    assert_eq!(tag_of(&chan.pop().unwrap()), 1);
    assert!(chan.pop().is_none());
}

#[test]
fn try_pop_states() {
    let chan = Channel::new(2);
    assert!(matches!(chan.try_pop(), TryPop::Empty));
    chan.push(tagged(4)).unwrap();
    match chan.try_pop() {
        TryPop::Data(buf) => assert_eq!(tag_of(&buf), 4),
        other => panic!("expected data, got {:?}", other),
    }
    chan.close();
    assert!(matches!(chan.try_pop(), TryPop::Done));
}
