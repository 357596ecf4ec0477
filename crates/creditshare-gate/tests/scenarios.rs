//! End-to-end flows through the `FileShare` facade.

mod common;

use bytes::Bytes;
use common::{config, memory_share, seed_file, user_with};
use creditshare_gate::{ErrorKind, ShareError, UploadRequest};
use creditshare_meta::{FileFilter, FileId, SortBy, TransactionKind, UserId, UNKNOWN_OWNER};

#[tokio::test]
async fn test_download_spends_exact_balance() {
    let share = memory_share(config(5, 10));
    let owner = user_with(&share, 0).await;
    let file = seed_file(&share, owner, "f.bin", b"payload").await;
    let u = user_with(&share, 5).await;

    let dl = share.request_download(u, file.id).await.unwrap();
    assert!(dl.charged());
    assert_eq!(dl.body.read_to_end().await.unwrap(), Bytes::from_static(b"payload"));

    assert_eq!(share.balance(u).unwrap(), 0);
    assert!(share.get_file(file.id).unwrap().downloaders.contains(&u));
    let debits: Vec<_> = share
        .history(u)
        .unwrap()
        .into_iter()
        .filter(|t| t.kind == TransactionKind::Debit)
        .collect();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].amount, -5);

    let again = share.request_download(u, file.id).await.unwrap();
    assert!(!again.charged());
    assert_eq!(share.balance(u).unwrap(), 0);
}

#[tokio::test]
async fn test_upload_rewards_new_user() {
    let share = memory_share(config(5, 10));
    let u = user_with(&share, 0).await;

    let record = share
        .upload(u, UploadRequest::named("hundred.bin"), Bytes::from(vec![1u8; 100]))
        .await
        .unwrap();
    assert_eq!(record.size, 100);
    assert_eq!(share.balance(u).unwrap(), 10);

    let history = share.history(u).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].amount, 10);
    assert_eq!(history[0].kind, TransactionKind::Credit);
}

#[tokio::test]
async fn test_insufficient_credits_leaves_state_alone() {
    let share = memory_share(config(5, 10));
    let owner = user_with(&share, 0).await;
    let file = seed_file(&share, owner, "f.bin", b"x").await;
    let u = user_with(&share, 4).await;

    let err = share.request_download(u, file.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientCredits);
    assert_eq!(share.balance(u).unwrap(), 4);
    assert!(share.get_user(u).unwrap().downloaded.is_empty());
    assert!(share.get_file(file.id).unwrap().downloaders.is_empty());
    assert_eq!(share.history(u).unwrap().len(), 1);
}

#[tokio::test]
async fn test_report_requires_download() {
    let share = memory_share(config(5, 10));
    let owner = user_with(&share, 0).await;
    let file = seed_file(&share, owner, "f.bin", b"x").await;
    let u = user_with(&share, 5).await;

    let err = share
        .report_issue(u, file.id, "corrupt", "won't open")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(share.get_file(file.id).unwrap().issues.is_empty());

    share.request_download(u, file.id).await.unwrap();
    let report = share
        .report_issue(u, file.id, "corrupt", "won't open")
        .await
        .unwrap();
    assert_eq!(report.reporter, u);

    let issues = share.get_file(file.id).unwrap().issues;
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].issue_type, "corrupt");
}

#[tokio::test]
async fn test_report_validation() {
    let share = memory_share(config(0, 10));
    let owner = user_with(&share, 0).await;
    let file = seed_file(&share, owner, "f.bin", b"x").await;
    share.request_download(owner, file.id).await.unwrap();

    let err = share.report_issue(owner, file.id, "", "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let err = share
        .report_issue(UserId::new(), file.id, "spam", "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = share
        .report_issue(owner, FileId::new(), "spam", "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_listing_filters_and_sorts() {
    let share = memory_share(config(0, 10));
    let alice = user_with(&share, 0).await;
    let bob = user_with(&share, 0).await;

    let small = share
        .upload(
            alice,
            UploadRequest {
                name: "small.png".into(),
                content_type: "image/png".into(),
                description: String::new(),
            },
            Bytes::from(vec![0u8; 10]),
        )
        .await
        .unwrap();
    let large = share
        .upload(
            alice,
            UploadRequest {
                name: "large.png".into(),
                content_type: "image/png".into(),
                description: String::new(),
            },
            Bytes::from(vec![0u8; 1000]),
        )
        .await
        .unwrap();
    let text = seed_file(&share, alice, "readme", b"hello").await;

    share.request_download(bob, large.id).await.unwrap();
    share.like_file(bob, small.id).await.unwrap();

    let pngs = share
        .list_files(&FileFilter {
            file_type: Some("image/png".into()),
            ..FileFilter::default()
        })
        .unwrap();
    assert_eq!(pngs.len(), 2);
    assert!(pngs.iter().all(|l| l.file.content_type == "image/png"));

    let mid = share
        .list_files(&FileFilter {
            min_size: Some(5),
            max_size: Some(10),
            ..FileFilter::default()
        })
        .unwrap();
    let ids: Vec<_> = mid.iter().map(|l| l.file.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&small.id) && ids.contains(&text.id));

    let by_downloads = share
        .list_files(&FileFilter {
            sort_by: SortBy::MostDownloads,
            ..FileFilter::default()
        })
        .unwrap();
    assert_eq!(by_downloads[0].file.id, large.id);

    let by_likes = share
        .list_files(&FileFilter {
            sort_by: SortBy::MostLikes,
            ..FileFilter::default()
        })
        .unwrap();
    assert_eq!(by_likes[0].file.id, small.id);

    let empty = share
        .list_files(&FileFilter {
            min_size: Some(100),
            max_size: Some(10),
            ..FileFilter::default()
        })
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_listing_owner_display() {
    let share = memory_share(config(0, 10));
    let alice = user_with(&share, 0).await;
    seed_file(&share, alice, "a", b"a").await;

    let listing = share.list_files(&FileFilter::default()).unwrap();
    assert_eq!(listing[0].owner_display, format!("{}@example.com", alice));
    assert_ne!(listing[0].owner_display, UNKNOWN_OWNER);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let share = memory_share(config(5, 10));
    let u = user_with(&share, 10).await;

    let err = share.request_download(u, FileId::new()).await.unwrap_err();
    assert!(matches!(err, ShareError::FileNotFound(_)));
    assert_eq!(share.balance(UserId::new()).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(share.get_file(FileId::new()).unwrap_err().kind(), ErrorKind::NotFound);
    let err = share
        .upload(UserId::new(), UploadRequest::named("x"), Bytes::from_static(b"x"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_every_balance_change_has_one_entry() {
    let share = memory_share(config(3, 7));
    let a = user_with(&share, 0).await;
    let b = user_with(&share, 20).await;

    let f1 = seed_file(&share, a, "one", b"1").await;
    let f2 = seed_file(&share, a, "two", b"22").await;
    share.request_download(b, f1.id).await.unwrap();
    share.request_download(b, f2.id).await.unwrap();
    share.request_download(b, f1.id).await.unwrap();
    share.debit(b, 2, "fee").await.unwrap();

    for user in [a, b] {
        let sum: i64 = share.history(user).unwrap().iter().map(|t| t.amount).sum();
        assert_eq!(sum, share.balance(user).unwrap() as i64);
    }
    assert_eq!(share.balance(a).unwrap(), 14);
    assert_eq!(share.balance(b).unwrap(), 20 - 3 - 3 - 2);
}
