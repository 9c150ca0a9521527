/// GraphQL indexer client
pub mod graphql;
