mod common;

use actix_web::{test, web, App};
use serde_json::Value;
use trailwatch::config;
use trailwatch::models::NewAccount;
use trailwatch::repo::{AccountRepo, ReportRepo};

use common::bearer;

#[actix_web::test]
async fn admin_delete_removes_report_and_image() {
    let (state, dir) = common::state(&[]).await;
    let data = web::Data::new(state);
    let app = test::init_service(App::new().app_data(data.clone()).configure(config)).await;

    let alice = data.repo.create_account(NewAccount::new("Alice", "alice@example.com")).await.unwrap();
    let mut admin = NewAccount::new("Admin", "admin@example.com");
    admin.is_admin = true;
    let admin = data.repo.create_account(admin).await.unwrap();
    let alice_token = data.tokens.issue(alice.id).unwrap();
    let admin_token = data.tokens.issue(admin.id).unwrap();

    let png = common::png(300, 200);
    let (ct, body) = common::multipart(
        &[("latitude", "12.5"), ("longitude", "-8.25"), ("description", "tarp in creek")],
        &[("image", &png[..])],
    );
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(("Content-Type", ct))
        .insert_header(bearer(&alice_token))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let report: Value = test::read_body_json(resp).await;
    let image_path = report["image_path"].as_str().unwrap().to_string();
    assert!(image_path.starts_with("uploads/") && image_path.ends_with(".jpg"));
    let file = dir.path().join(&image_path);
    assert!(file.exists());

    let uri = format!("/api/v1/reports/{}", report["id"]);
    let req = test::TestRequest::delete().uri(&uri).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::delete().uri(&uri).insert_header(bearer(&alice_token)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    assert!(file.exists());

    let req = test::TestRequest::delete().uri(&uri).insert_header(bearer(&admin_token)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    assert!(!file.exists());

    let req = test::TestRequest::delete().uri(&uri).insert_header(bearer(&admin_token)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn account_deletion_cascades_and_revokes_access() {
    let (state, _dir) = common::state(&[]).await;
    let data = web::Data::new(state);
    let app = test::init_service(App::new().app_data(data.clone()).configure(config)).await;

    let bob = data.repo.create_account(NewAccount::new("Bob", "bob@example.com")).await.unwrap();
    let mut admin = NewAccount::new("Admin", "admin@example.com");
    admin.is_admin = true;
    let admin = data.repo.create_account(admin).await.unwrap();
    let bob_token = data.tokens.issue(bob.id).unwrap();
    let admin_token = data.tokens.issue(admin.id).unwrap();

    let (ct, body) = common::multipart(&[("latitude", "1"), ("longitude", "2"), ("description", "cans")], &[]);
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(("Content-Type", ct))
        .insert_header(bearer(&bob_token))
        .set_payload(body)
        .to_request();
    let report: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let report_id = report["id"].as_i64().unwrap();

    // a regular account cannot delete accounts
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/accounts/{}", admin.id))
        .insert_header(bearer(&bob_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/accounts/{}", bob.id))
        .insert_header(bearer(&admin_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    assert!(data.repo.get_account(bob.id).await.unwrap().is_none());
    assert!(data.repo.get_report(report_id).await.unwrap().is_none());

    // the signature is still valid but the account is gone
    let req = test::TestRequest::get().uri("/api/v1/auth/me").insert_header(bearer(&bob_token)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/accounts/{}", bob.id))
        .insert_header(bearer(&admin_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn account_deletion_removes_owned_images() {
    let (state, dir) = common::state(&[]).await;
    let data = web::Data::new(state);
    let app = test::init_service(App::new().app_data(data.clone()).configure(config)).await;

    let carol = data.repo.create_account(NewAccount::new("Carol", "carol@example.com")).await.unwrap();
    let dave = data.repo.create_account(NewAccount::new("Dave", "dave@example.com")).await.unwrap();
    let mut admin = NewAccount::new("Admin", "admin@example.com");
    admin.is_admin = true;
    let admin = data.repo.create_account(admin).await.unwrap();
    let admin_token = data.tokens.issue(admin.id).unwrap();

    let png = common::png(64, 64);
    let mut files = Vec::new();
    for (token, description) in [
        (data.tokens.issue(carol.id).unwrap(), "tires"),
        (data.tokens.issue(carol.id).unwrap(), "pallets"),
        (data.tokens.issue(dave.id).unwrap(), "glass"),
    ] {
        let (ct, body) = common::multipart(
            &[("latitude", "3"), ("longitude", "4"), ("description", description)],
            &[("image", &png[..])],
        );
        let req = test::TestRequest::post()
            .uri("/api/v1/reports")
            .insert_header(("Content-Type", ct))
            .insert_header(bearer(&token))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let report: Value = test::read_body_json(resp).await;
        files.push(dir.path().join(report["image_path"].as_str().unwrap()));
    }
    assert!(files.iter().all(|f| f.exists()));
    assert_eq!(data.repo.image_paths_of(carol.id).await.unwrap().len(), 2);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/accounts/{}", carol.id))
        .insert_header(bearer(&admin_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    assert!(!files[0].exists());
    assert!(!files[1].exists());
    assert!(files[2].exists(), "other accounts keep their images");
    assert!(data.repo.image_paths_of(carol.id).await.unwrap().is_empty());
    assert!(data.repo.oldest_report_with_image().await.unwrap().is_some());
}
