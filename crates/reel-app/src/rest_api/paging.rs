use garde::Validate;
use reel_dal::{movie::MovieFilter, Filters, ListingParams, ValidationErrors};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};

/// Query string of the movie listing.
///
/// `page` and `page_size` are kept as text so a non-numeric value is reported
/// together with the other listing failures.
#[derive(Debug, Clone, Default, Validate, Deserialize)]
#[garde(allow_unvalidated)]
pub struct MovieQuery {
    #[garde(length(max = 500))]
    title: Option<String>,
    /// Comma separated genre names.
    #[garde(length(max = 1500))]
    genres: Option<String>,
    #[garde(length(max = 20))]
    page: Option<String>,
    #[garde(length(max = 20))]
    page_size: Option<String>,
    #[garde(length(max = 100))]
    sort: Option<String>,
}

/// Integer query value, `default` when absent. Out of range values saturate so
/// the bounds checks report them.
fn read_int(value: Option<&str>, field: &str, default: u32, errors: &mut ValidationErrors) -> u32 {
    let Some(value) = value else {
        return default;
    };
    match value.trim().parse::<i64>() {
        Ok(n) if n < 0 => 0,
        Ok(n) => u32::try_from(n).unwrap_or(u32::MAX),
        Err(_) => {
            errors.add(field, "must be an integer value");
            default
        }
    }
}

impl MovieQuery {
    pub fn into_listing(
        self,
        default_page_size: u32,
        valid_fields: &[&'static str],
    ) -> ApiResult<(MovieFilter, ListingParams)> {
        let genres = self
            .genres
            .map(|genres| {
                genres
                    .split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let filter = MovieFilter::new(self.title.unwrap_or_default(), genres);

        let mut errors = ValidationErrors::new();
        let defaults = Filters::default();
        let filters = Filters {
            page: read_int(self.page.as_deref(), "page", defaults.page, &mut errors),
            page_size: read_int(
                self.page_size.as_deref(),
                "page_size",
                default_page_size,
                &mut errors,
            ),
            sort: self.sort.unwrap_or(defaults.sort),
        };

        match filters.into_listing_params(valid_fields) {
            Ok(params) => {
                errors.into_result()?;
                Ok((filter, params))
            }
            Err(reel_dal::Error::Validation(more)) => {
                for (field, message) in more.iter() {
                    errors.add(field, message);
                }
                Err(ApiError::Validation(errors))
            }
            Err(e) => Err(e.into()),
        }
    }
}
