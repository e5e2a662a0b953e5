pub mod attribute;
pub mod genre;
pub mod label;
pub mod movie;
pub mod movie_attribute;
pub mod movie_genre;
pub mod movie_label;
pub mod news;
pub mod news_movie;
