mod commands;
mod helpers;
mod layers;
mod pause_resume;
mod scenarios;
mod streaming;
mod strategies;
mod subgraphs;
