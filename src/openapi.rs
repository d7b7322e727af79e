use crate::models::{Account, Comment, LeaderboardEntry, PublicProfile, Rank, Report};
use crate::routes::{
    ChangePasswordRequest, CommentRequest, LoginRequest, RegisterRequest, ReportUpload, TokenResponse,
};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::login,
        crate::routes::auth_me,
        crate::routes::change_password,
        crate::routes::google_login,
        crate::routes::google_callback,
        crate::routes::create_report,
        crate::routes::list_reports,
        crate::routes::get_report,
        crate::routes::delete_report,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::leaderboard,
        crate::routes::account_rank,
        crate::routes::delete_account,
    ),
    components(schemas(
        Account, PublicProfile, Report, Comment, LeaderboardEntry, Rank,
        RegisterRequest, LoginRequest, TokenResponse, ChangePasswordRequest, CommentRequest, ReportUpload
    )),
    modifiers(&BearerScheme),
    tags(
        (name = "accounts", description = "Registration and sessions"),
        (name = "reports", description = "Geo-tagged trash reports"),
        (name = "leaderboard", description = "Experience ranking"),
    )
)]
pub struct ApiDoc;

struct BearerScheme;

impl Modify for BearerScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_report_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/reports"));
        assert!(doc.paths.paths.contains_key("/api/v1/reports/{id}/comments"));
        assert!(doc.components.unwrap().security_schemes.contains_key("bearerAuth"));
    }
}
