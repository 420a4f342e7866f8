// Allocation maps written by the external allocator
pub mod allocation;

// Runtime control files (mode, brain state, guardian pause)
pub mod control;

// Domain-specific error types
pub mod errors;

// Port interfaces
pub mod ports;

// Quotes and their provenance
pub mod quote;

// Risk accounting domain
pub mod risk;

// Symbol classification
pub mod symbol;

// Core trading domain
pub mod trading;
