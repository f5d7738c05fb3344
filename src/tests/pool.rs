use crate::dims::Dims;
use crate::resources::{Config, ResourceManager};

#[test]
fn counts_checkouts_and_returns() {
    let resources = ResourceManager::new(Config::default());
    assert_eq!(resources.in_use_count(), 0);

    let a = resources.request_buffer(Dims::Two(4, 4)).unwrap();
    let b = resources.request_buffer(Dims::Two(4, 4)).unwrap();
    assert_eq!(resources.in_use_count(), 2);
    assert_eq!(resources.idle_count(), 0);

    resources.release_buffer(a);
    resources.release_buffer(b);
    assert_eq!(resources.in_use_count(), 0);
    assert_eq!(resources.idle_count(), 2);
}

#[test]
fn reuses_idle_buffers_of_same_shape() {
    let resources = ResourceManager::new(Config::default());

    let buf = resources.request_buffer(Dims::Two(8, 8)).unwrap();
    resources.release_buffer(buf);
    assert_eq!(resources.idle_count(), 1);

    // Same shape comes from the free-list, a different shape allocates.
    let same = resources.request_buffer(Dims::Two(8, 8)).unwrap();
    assert_eq!(resources.idle_count(), 0);
    let other = resources.request_buffer(Dims::Two(8, 9)).unwrap();
    assert_eq!(resources.in_use_count(), 2);

    resources.release_buffer(same);
    resources.release_buffer(other);
    assert_eq!(resources.idle_count(), 2);
}

#[test]
fn free_lists_are_keyed_by_shape() {
    let resources = ResourceManager::new(Config::default());
    let a = resources.request_buffer(Dims::One(16)).unwrap();
    let b = resources.request_buffer(Dims::Two(4, 4)).unwrap();
    assert_eq!(a.len(), b.len());
    resources.release_buffer(a);
    resources.release_buffer(b);

    // Sixteen elements in one dimension must not satisfy a 4×4 request.
    let c = resources.request_buffer(Dims::Two(4, 4)).unwrap();
    assert_eq!(resources.idle_count(), 1);
    resources.release_buffer(c);
}

#[test]
fn reissued_buffers_carry_no_stale_metadata() {
    let resources = ResourceManager::new(Config::default());
    let mut buf = resources.request_buffer(Dims::Two(2, 2)).unwrap();
    buf.push_seq(41);
    resources.release_buffer(buf);

    let buf = resources.request_buffer(Dims::Two(2, 2)).unwrap();
    assert_eq!(buf.seq(), None);
    resources.release_buffer(buf);
}
