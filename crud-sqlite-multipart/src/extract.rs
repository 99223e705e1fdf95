use axum::extract::{FromRequest, Request};
use axum_macros::FromRequestParts;

/// `axum::extract::Path` that rejects with [`crate::Error`], so bad ids get
/// the same JSON error body as every other failure.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(crate::Error))]
pub struct Path<T>(pub T);

/// Same for `axum::extract::Multipart`. Consumes the body, so it goes last.
pub struct Multipart(pub axum::extract::Multipart);

impl<S> FromRequest<S> for Multipart
where
    S: Send + Sync,
{
    type Rejection = crate::Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let multipart = axum::extract::Multipart::from_request(req, state).await?;
        Ok(Self(multipart))
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::header};

    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn multipart_rejects_with_crate_error() {
        let request = axum::http::Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let result = Multipart::from_request(request, &()).await;

        assert!(matches!(result, Err(Error::MultipartRejection(_))));
    }

    #[tokio::test]
    async fn multipart_reads_fields() {
        let body = "--XX\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nfirst\r\n--XX--\r\n";
        let request = axum::http::Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XX")
            .body(Body::from(body))
            .unwrap();

        let Multipart(mut multipart) = Multipart::from_request(request, &()).await.unwrap();
        let field = multipart.next_field().await.unwrap().unwrap();

        assert_eq!(field.name(), Some("title"));
        assert_eq!(field.text().await.unwrap(), "first");
    }
}
