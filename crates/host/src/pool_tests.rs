// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn permits_are_per_host() {
    let pool = HostPool::new(2);
    let h1 = HostSpec::parse("a@h1");
    let h2 = HostSpec::parse("a@h2");

    let _p1 = pool.acquire(&h1).await;
    let _p2 = pool.acquire(&h1).await;

    assert_eq!(pool.available(&h1), 0);
    assert_eq!(pool.available(&h2), 2, "other hosts are unaffected");
}

#[tokio::test]
async fn permit_release_on_drop() {
    let pool = HostPool::new(1);
    let host = HostSpec::Localhost;

    {
        let _permit = pool.acquire(&host).await;
        assert_eq!(pool.available(&host), 0);
    }
    assert_eq!(pool.available(&host), 1);
}

#[tokio::test]
async fn acquire_waits_for_capacity() {
    let pool = std::sync::Arc::new(HostPool::new(1));
    let host = HostSpec::Localhost;

    let permit = pool.acquire(&host).await;
    let pool2 = std::sync::Arc::clone(&pool);
    let host2 = host.clone();
    let waiter = tokio::spawn(async move {
        let _p = pool2.acquire(&host2).await;
    });

    // The waiter can't finish until we release.
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    drop(permit);
    waiter.await.unwrap();
}
