#![allow(clippy::all)]
use ethers::contract::abigen;

abigen!(ZkDvrf, "./abi/zkdvrf.json");
