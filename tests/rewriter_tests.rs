mod common;

use common::{FakeGateway, engine, register_image, register_text_object, settings, test_db};
use media_cloud_sync::{NewMediaObject, Readable, services::rewriter::ImageSource};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn every_read_surface_of_a_synced_image_points_at_the_cloud() {
    let db = test_db().await;
    let engine = engine(
        &db,
        settings(),
        Arc::new(FakeGateway::new().with_url("https://cdn/x")),
    );
    register_image(&engine, db.dir.path(), 1).await;
    engine.sync(1).await.unwrap();

    let src = engine
        .rewrite(
            Some(1),
            Readable::ImageSrc(ImageSource {
                url: "/img/a-150x150.jpg".into(),
                width: Some(150),
                height: Some(150),
            }),
        )
        .await
        .unwrap();
    assert_eq!(
        src,
        Readable::ImageSrc(ImageSource {
            url: "https://cdn/x".into(),
            width: Some(150),
            height: Some(150),
        })
    );

    let embed = engine
        .rewrite(
            Some(1),
            Readable::EmbedHtml(r#"<img src="/img/a.jpg" alt="a">"#.into()),
        )
        .await
        .unwrap();
    assert_eq!(
        embed,
        Readable::EmbedHtml(r#"<img src="https://cdn/x" alt="a">"#.into())
    );

    let editor = engine
        .rewrite(
            Some(1),
            Readable::EditorHtml(
                r#"<p><img src="/img/a-150x150.jpg"><a href="https://site.example/uploads/img/a.jpg">full</a><img src="/img/other.jpg"></p>"#
                    .into(),
            ),
        )
        .await
        .unwrap();
    assert_eq!(
        editor,
        Readable::EditorHtml(
            r#"<p><img src="https://cdn/x"><a href="https://cdn/x">full</a><img src="/img/other.jpg"></p>"#
                .into()
        )
    );

    let meta = engine
        .rewrite(
            Some(1),
            Readable::Metadata(json!({
                "url": "/img/a.jpg",
                "sizes": { "medium": { "url": "/img/a-300x300.jpg" } }
            })),
        )
        .await
        .unwrap();
    let Readable::Metadata(meta) = meta else {
        panic!("metadata changed kind");
    };
    assert_eq!(meta["url"], "https://cdn/x");
    assert_eq!(meta["cloud_uploaded"], true);
    assert_eq!(meta["sizes"]["medium"]["url"], "https://cdn/x");
    assert_eq!(meta["sizes"]["medium"]["original_url"], "/img/a-300x300.jpg");
}

#[tokio::test]
async fn unsynced_objects_read_unchanged() {
    let db = test_db().await;
    let engine = engine(&db, settings(), Arc::new(FakeGateway::new()));
    register_image(&engine, db.dir.path(), 1).await;

    let srcset = Readable::Srcset("/img/a-150x150.jpg 150w".into());
    assert_eq!(engine.rewrite(Some(1), srcset.clone()).await.unwrap(), srcset);

    let Readable::Metadata(meta) = engine
        .rewrite(Some(1), Readable::Metadata(json!({ "url": "/img/a.jpg" })))
        .await
        .unwrap()
    else {
        panic!("metadata changed kind");
    };
    assert_eq!(meta["url"], "/img/a.jpg");
    assert_eq!(meta["cloud_uploaded"], false);
}

#[tokio::test]
async fn content_rewrites_only_synced_local_urls() {
    let db = test_db().await;
    let engine = engine(
        &db,
        settings(),
        Arc::new(FakeGateway::new().with_url("https://cdn/x")),
    );
    register_image(&engine, db.dir.path(), 1).await;
    register_text_object(&engine, db.dir.path(), 2).await;
    engine.sync(1).await.unwrap();

    let text = "<img src=\"https://site.example/uploads/2024/a-300x300.jpg\"> \
                notes at https://site.example/uploads/obj-2.txt and \
                https://elsewhere.example/a.jpg.";
    let rewritten = engine
        .rewrite(None, Readable::Content(text.into()))
        .await
        .unwrap();
    assert_eq!(
        rewritten,
        Readable::Content(
            "<img src=\"https://cdn/x\"> \
             notes at https://site.example/uploads/obj-2.txt and \
             https://elsewhere.example/a.jpg."
                .into()
        )
    );
}

#[tokio::test]
async fn reverse_lookup_prefers_the_lowest_id() {
    let db = test_db().await;
    let engine = engine(&db, settings(), Arc::new(FakeGateway::new()));
    for (id, dir) in [(3, "late"), (2, "early")] {
        let path = common::write_file(&db.dir.path().join(dir), "dup.jpg", b"\xFF\xD8\xFF");
        engine
            .register(NewMediaObject {
                id,
                local_path: path.display().to_string(),
                variant_paths: vec!["dup-100x100.jpg".into()],
                mime_type: Some("image/jpeg".into()),
                size_bytes: None,
            })
            .await
            .unwrap();
    }

    let rewriter = engine.rewriter();
    assert_eq!(
        rewriter.resolve_object_id("https://site.example/uploads/dup.jpg").await.unwrap(),
        Some(2)
    );
    assert_eq!(
        rewriter.resolve_object_id("/x/dup-100x100.jpg?v=3").await.unwrap(),
        Some(2)
    );
    assert_eq!(rewriter.resolve_object_id("/x/missing.jpg").await.unwrap(), None);

    assert!(rewriter.url_belongs_to_object("/late/dup-100x100.jpg", 3).await.unwrap());
    assert!(!rewriter.url_belongs_to_object("/late/other.jpg", 3).await.unwrap());
}

#[tokio::test]
async fn exact_file_name_beats_the_size_stripped_name() {
    let db = test_db().await;
    let engine = engine(&db, settings(), Arc::new(FakeGateway::new()));
    for (id, name) in [(2, "pic.jpg"), (5, "pic-100x100.jpg")] {
        let path = common::write_file(db.dir.path(), name, b"\xFF\xD8\xFF");
        engine
            .register(NewMediaObject {
                id,
                local_path: path.display().to_string(),
                variant_paths: Vec::new(),
                mime_type: Some("image/jpeg".into()),
                size_bytes: None,
            })
            .await
            .unwrap();
    }

    let rewriter = engine.rewriter();
    assert_eq!(
        rewriter.resolve_object_id("/up/pic-100x100.jpg").await.unwrap(),
        Some(5)
    );
    assert_eq!(
        rewriter.resolve_object_id("/up/pic-300x300.jpg").await.unwrap(),
        Some(2)
    );
}
